use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use quarry_core::{CollectorKind, Intent};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Resolve data artifacts by attributes and move them between stores",
    disable_help_subcommand = true
)]
#[allow(clippy::struct_excessive_bools)]
pub struct QuarryCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandArgs,
}

#[derive(Args, Debug, Clone)]
pub struct AttrArgs {
    #[arg(
        short = 'a',
        long = "attr",
        value_name = "KEY=VALUE",
        help = "Attribute binding; a comma-separated value is expanded",
        value_parser = quarry_core::parse_assignment
    )]
    pub attrs: Vec<(String, quarry_domain::Value)>,
}

#[derive(Subcommand, Debug)]
pub enum CommandArgs {
    #[command(about = "Print the physical location of every matching artifact")]
    Locate(AttrArgs),
    #[command(about = "Retrieve artifacts into their local containers")]
    Get {
        #[command(flatten)]
        attrs: AttrArgs,
        #[arg(long, value_enum, default_value_t = IntentArg::In)]
        intent: IntentArg,
    },
    #[command(about = "Publish local containers to their stores")]
    Put(AttrArgs),
    #[command(about = "Check whether artifacts exist in their stores")]
    Check(AttrArgs),
    #[command(about = "Remove artifacts from their stores")]
    Delete(AttrArgs),
    #[command(about = "Show why each candidate matched or was rejected")]
    Explain(AttrArgs),
    #[command(about = "List registered candidates")]
    Candidates {
        #[arg(value_enum)]
        collector: Option<CollectorArg>,
    },
    #[command(subcommand, about = "Inspect or clean the local cache")]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    #[command(about = "Print the cache root")]
    Path,
    #[command(about = "Remove stale temporary files")]
    Gc {
        #[arg(long, value_name = "HOURS")]
        max_age_hours: Option<u64>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntentArg {
    In,
    Out,
    Inout,
}

impl From<IntentArg> for Intent {
    fn from(value: IntentArg) -> Self {
        match value {
            IntentArg::In => Intent::In,
            IntentArg::Out => Intent::Out,
            IntentArg::Inout => Intent::InOut,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorArg {
    Resource,
    Provider,
    Container,
    Store,
}

impl From<CollectorArg> for CollectorKind {
    fn from(value: CollectorArg) -> Self {
        match value {
            CollectorArg::Resource => CollectorKind::Resource,
            CollectorArg::Provider => CollectorKind::Provider,
            CollectorArg::Container => CollectorKind::Container,
            CollectorArg::Store => CollectorKind::Store,
        }
    }
}
