use std::path::PathBuf;

use quarry_core::{
    Config, HandlerError, Location, LocationError, MatchConfig, Provider, Resource, Session,
    SessionError,
};
use quarry_domain::{
    AmbiguityPolicy, AttrSpec, Candidate, ResolutionError, Scope, Specification, TemplateError,
    Value,
};

mod common;

use common::{artifact, session};

#[derive(Debug)]
struct TreeProvider {
    root: &'static str,
}

impl Provider for TreeProvider {
    fn realkind(&self) -> &str {
        "tree"
    }

    fn scheme(&self, _scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok("file".to_string())
    }

    fn netloc(&self, _scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(String::new())
    }

    fn pathname(&self, scope: &Scope<'_>) -> Result<String, TemplateError> {
        Ok(format!("/{}/{}", self.root, scope.text("tree")?))
    }

    fn basename(
        &self,
        resource: &dyn Resource,
        scope: &Scope<'_>,
    ) -> Result<String, TemplateError> {
        resource.basename(scope)
    }
}

fn tree_spec(priority: &str) -> Specification {
    Specification::builder("Shared tree")
        .attr("tree", AttrSpec::string())
        .priority(priority)
        .build()
}

fn register_trees(session: &mut Session, levels: [(&'static str, &'static str); 2]) {
    for (name, level) in levels {
        session
            .registry_mut()
            .providers_mut()
            .register(Candidate::new(name, tree_spec(level), move |_, _| {
                Ok(Box::new(TreeProvider { root: name }) as Box<dyn Provider>)
            }))
            .expect("register tree provider");
    }
}

fn tree_bag(work: &std::path::Path) -> quarry_domain::Bag {
    let mut bag = artifact(work);
    bag.shift_remove("experiment");
    bag.shift_remove("block");
    bag.insert("tree".into(), Value::str("shared"));
    bag
}

#[test]
fn resolution_is_deterministic() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    let bags = [artifact(temp.path())];

    let first: Vec<String> = session
        .load(&bags)
        .expect("load")
        .iter()
        .map(|handler| handler.location().expect("location").to_string())
        .collect();
    let first_report = session.last_report().cloned();
    let second: Vec<String> = session
        .load(&bags)
        .expect("load")
        .iter()
        .map(|handler| handler.location().expect("location").to_string())
        .collect();

    assert_eq!(first, second);
    assert_eq!(first_report.as_ref(), session.last_report());
    assert_eq!(
        first,
        [
            "quarry://quarry.multi.local/quarry/default/oper/20240101T0000P/forecast/analysis.arpege.global.grib"
        ]
    );
}

#[test]
fn higher_priority_provider_wins_and_can_be_demoted() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    register_trees(&mut session, [("toolbox_tree", "toolbox"), ("oper_tree", "oper")]);

    let handler = session
        .handler(&tree_bag(temp.path()))
        .expect("load")
        .expect("complete handler");
    assert_eq!(handler.provider().map(|p| p.name()), Some("oper_tree"));
    assert_eq!(
        handler.location().expect("location").path(),
        "oper_tree/shared/analysis.arpege.global.grib"
    );

    session
        .registry_mut()
        .priorities_mut()
        .top("toolbox")
        .expect("known level");
    let handler = session
        .handler(&tree_bag(temp.path()))
        .expect("load")
        .expect("complete handler");
    assert_eq!(handler.provider().map(|p| p.name()), Some("toolbox_tree"));
}

#[test]
fn equal_rank_is_rejected_or_settled_by_declaration_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut strict = Session::with_builtins(Config::for_root(temp.path()).with_matching(
        MatchConfig {
            strict: true,
            ambiguity: AmbiguityPolicy::Reject,
        },
    ));
    register_trees(&mut strict, [("left_tree", "oper"), ("right_tree", "oper")]);
    let err = strict
        .load(&[tree_bag(temp.path())])
        .expect_err("ambiguous providers");
    match err {
        SessionError::Resolution(ResolutionError::Ambiguous { candidates, .. }) => {
            assert_eq!(candidates, ["left_tree", "right_tree"]);
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut lenient = Session::with_builtins(Config::for_root(temp.path()).with_matching(
        MatchConfig {
            strict: true,
            ambiguity: AmbiguityPolicy::FirstDeclared,
        },
    ));
    register_trees(&mut lenient, [("left_tree", "oper"), ("right_tree", "oper")]);
    let handler = lenient
        .handler(&tree_bag(temp.path()))
        .expect("load")
        .expect("complete handler");
    assert_eq!(handler.provider().map(|p| p.name()), Some("left_tree"));
}

#[test]
fn list_values_expand_in_input_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    let mut bag = artifact(temp.path());
    bag.insert(
        "date".into(),
        Value::List(vec![Value::str("2024010112"), Value::str("2024010100")]),
    );
    bag.insert("term".into(), Value::List(vec![Value::Int(6), Value::Int(12)]));

    let paths: Vec<String> = session
        .load(&[bag])
        .expect("load")
        .iter()
        .map(|handler| handler.location().expect("location").path().to_string())
        .collect();
    assert_eq!(paths.len(), 4);
    assert!(paths[0].contains("20240101T1200P") && paths[0].ends_with("+0006.grib"));
    assert!(paths[1].contains("20240101T1200P") && paths[1].ends_with("+0012.grib"));
    assert!(paths[2].contains("20240101T0000P") && paths[2].ends_with("+0006.grib"));
    assert!(paths[3].contains("20240101T0000P") && paths[3].ends_with("+0012.grib"));
}

#[test]
fn reassigned_attributes_rerender_the_location() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    let mut raw = artifact(temp.path());
    raw.shift_remove("experiment");
    raw.shift_remove("block");
    raw.insert("remote".into(), Value::str("a/[term::fmth]"));
    raw.insert("term".into(), Value::Int(6));

    let mut handler = session
        .handler(&raw)
        .expect("load")
        .expect("complete handler");
    let location = handler.location().expect("location");
    assert_eq!(location.scheme(), "file");
    assert_eq!(location.path(), "a/0006");
    assert!(location.is_relative());

    handler.set_attr("term", 12).expect("term is a term");
    assert_eq!(handler.location().expect("location").path(), "a/0012");

    assert!(handler.set_attr("term", "soon").is_err());
    handler.set_attr("role", "Guess").expect("untracked key");
    assert_eq!(handler.options().get("role"), Some(&Value::str("Guess")));
}

#[test]
fn unreachable_back_reference_fails_only_at_render_time() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    let mut raw = artifact(temp.path());
    raw.insert("filename".into(), Value::str("[nowhere]/out.grib"));

    let handler = session
        .handler(&raw)
        .expect("load")
        .expect("complete handler");
    assert!(handler.location().is_ok());
    let err = handler.local_path().expect_err("nowhere is not bound");
    assert_eq!(err.code(), "QY201");
    assert!(matches!(
        err,
        HandlerError::Location(LocationError::Template(
            TemplateError::Unreachable { .. }
        ))
    ));
}

#[test]
fn magic_locations_pass_through_unchanged() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session(temp.path());
    let handler = session
        .magic("https://example.org/obs/synop.txt?extract=a", "synop.txt")
        .expect("magic handler");
    assert_eq!(
        handler.location().expect("location"),
        Location::parse("https://example.org/obs/synop.txt?extract=a").expect("parse")
    );
    assert_eq!(
        handler.local_path().expect("local"),
        PathBuf::from("synop.txt")
    );
    assert_eq!(handler.resource().map(|r| r.name()), Some("unknown"));
}
