//! Stable diagnostic codes carried by every error message.

pub mod resolution {
    pub const NO_CANDIDATE: &str = "QY101";
    pub const AMBIGUOUS: &str = "QY102";
}

pub mod template {
    pub const UNREACHABLE: &str = "QY201";
    pub const HELPER: &str = "QY202";
    pub const CYCLE: &str = "QY203";
    pub const COERCION: &str = "QY204";
    pub const INVALID_VALUE: &str = "QY205";
}

pub mod location {
    pub const INVALID: &str = "QY210";
    pub const INCOMPLETE: &str = "QY211";
}

pub mod store {
    pub const INTEGRITY: &str = "QY301";
    pub const READONLY: &str = "QY302";
    pub const UNKNOWN: &str = "QY303";
    pub const CONFIGURATION: &str = "QY304";
    pub const IO: &str = "QY305";
}

pub mod registry {
    pub const DUPLICATE_NAME: &str = "QY401";
    pub const DUPLICATE_SPEC: &str = "QY402";
    pub const UNKNOWN_PLUGIN: &str = "QY403";
    pub const UNKNOWN_COLLECTOR: &str = "QY404";
    pub const PLUGIN_FAILED: &str = "QY405";
    pub const PRIORITY: &str = "QY406";
}
