//! Builders for NETCONF request bodies.
//!
//! Each function renders the body of one protocol operation; the
//! session wraps bodies in `<rpc message-id="..">` when they are sent,
//! so message-id assignment stays in one place. Filter and `<config>`
//! arguments are taken as pre-rendered XML fragments, matching how
//! operators usually keep them.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
const NOTIFICATION_NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
const WITH_DEFAULTS_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults";
const NMDA_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-nmda";
const DATASTORES_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-datastores";
const ORIGIN_NS: &str = "urn:ietf:params:xml:ns:yang:ietf-origin";

/// Default-reporting modes defined by RFC 6243.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum WithDefaults {
    ReportAll,
    ReportAllTagged,
    Trim,
    Explicit,
}

impl WithDefaults {
    fn as_str(self) -> &'static str {
        match self {
            WithDefaults::ReportAll => "report-all",
            WithDefaults::ReportAllTagged => "report-all-tagged",
            WithDefaults::Trim => "trim",
            WithDefaults::Explicit => "explicit",
        }
    }
}

/// Options for `<edit-config>` beyond config and target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EditConfigOptions {
    /// `<default-operation>`: `merge`, `replace`, or `none`.
    pub default_operation: Option<String>,
    /// `<test-option>`: `test-then-set`, `set`, or `test-only`.
    pub test_option: Option<String>,
    /// `<error-option>`: `stop-on-error`, `continue-on-error`, or
    /// `rollback-on-error`.
    pub error_option: Option<String>,
}

/// Options for `<commit>`, covering confirmed and persistent commits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommitOptions {
    /// Issue a confirmed commit.
    pub confirmed: bool,
    /// Seconds until an unconfirmed commit rolls back.
    pub confirm_timeout: Option<u32>,
    /// Persist token making the confirmed commit survive the session.
    pub persist: Option<String>,
    /// Token matching a prior `<persist>` of the commit being confirmed.
    pub persist_id: Option<String>,
}

/// Parameters for the NMDA `<get-data>` operation (RFC 8526).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GetDataRequest {
    /// Source datastore, e.g. `ds:operational` or `ds:running`.
    pub datastore: String,
    /// Pre-rendered `<subtree-filter>` or `<xpath-filter>` fragment.
    pub filter: Option<String>,
    /// Restrict to `config true` (Some(true)) or `config false` nodes.
    pub config_filter: Option<bool>,
    /// Origin identities to filter on, e.g. `or:intended`.
    pub origin_filters: Vec<String>,
    /// Emit `<negated-origin-filter>` instead of `<origin-filter>`.
    pub negate_origin_filters: bool,
    /// Maximum subtree depth returned.
    pub max_depth: Option<u16>,
    /// Request `origin` annotations on returned nodes.
    pub with_origin: bool,
    /// Default-reporting mode.
    pub with_defaults: Option<WithDefaults>,
}

impl Default for GetDataRequest {
    fn default() -> Self {
        Self {
            datastore: "ds:operational".to_string(),
            filter: None,
            config_filter: None,
            origin_filters: Vec::new(),
            negate_origin_filters: false,
            max_depth: None,
            with_origin: false,
            with_defaults: None,
        }
    }
}

/// Parameters for `<create-subscription>` (RFC 5277).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SubscriptionRequest {
    /// Event stream to subscribe to; the server default when omitted.
    pub stream: Option<String>,
    /// Pre-rendered `<filter>` fragment selecting notifications.
    pub filter: Option<String>,
    /// Earliest notification to replay.
    pub start_time: Option<String>,
    /// Latest notification to replay.
    pub stop_time: Option<String>,
}

/// Wraps a request body in the `<rpc>` envelope with its message-id.
pub(crate) fn wrap_rpc(message_id: u64, body: &str) -> String {
    format!(r#"<rpc message-id="{message_id}" xmlns="{BASE_NS}">{body}</rpc>"#)
}

/// Wraps a subtree filter fragment in a `<filter>` element.
pub fn subtree_filter(inner: &str) -> String {
    format!("<filter>{inner}</filter>")
}

pub fn get(filter: Option<&str>, with_defaults: Option<WithDefaults>) -> String {
    let mut pieces = vec![format!(r#"<get xmlns:nc="{BASE_NS}">"#)];
    if let Some(filter) = filter {
        pieces.push(filter.to_string());
    }
    if let Some(mode) = with_defaults {
        pieces.push(make_with_defaults(mode));
    }
    pieces.push("</get>".to_string());
    pieces.concat()
}

pub fn get_config(source: &str, filter: Option<&str>, with_defaults: Option<WithDefaults>) -> String {
    let mut pieces = vec![format!(r#"<get-config xmlns:nc="{BASE_NS}">"#)];
    pieces.push(format!("<source><{source}/></source>"));
    if let Some(filter) = filter {
        pieces.push(filter.to_string());
    }
    if let Some(mode) = with_defaults {
        pieces.push(make_with_defaults(mode));
    }
    pieces.push("</get-config>".to_string());
    pieces.concat()
}

pub fn get_data(request: &GetDataRequest) -> String {
    let mut pieces = vec![format!(
        r#"<get-data xmlns="{NMDA_NS}" xmlns:ds="{DATASTORES_NS}" xmlns:or="{ORIGIN_NS}">"#
    )];
    pieces.push(format!("<datastore>{}</datastore>", request.datastore));
    if let Some(filter) = &request.filter {
        pieces.push(filter.clone());
    }
    if let Some(config_filter) = request.config_filter {
        pieces.push(format!("<config-filter>{config_filter}</config-filter>"));
    }
    let origin_tag = if request.negate_origin_filters {
        "negated-origin-filter"
    } else {
        "origin-filter"
    };
    for origin in &request.origin_filters {
        pieces.push(format!("<{origin_tag}>{origin}</{origin_tag}>"));
    }
    if let Some(depth) = request.max_depth {
        pieces.push(format!("<max-depth>{depth}</max-depth>"));
    }
    if request.with_origin {
        pieces.push("<with-origin/>".to_string());
    }
    if let Some(mode) = request.with_defaults {
        pieces.push(make_with_defaults(mode));
    }
    pieces.push("</get-data>".to_string());
    pieces.concat()
}

pub fn edit_config(config: &str, target: &str, options: &EditConfigOptions) -> String {
    let mut pieces = vec![format!(r#"<edit-config xmlns:nc="{BASE_NS}">"#)];
    pieces.push(format!("<target><{target}/></target>"));
    if let Some(op) = &options.default_operation {
        pieces.push(format!("<default-operation>{op}</default-operation>"));
    }
    if let Some(test) = &options.test_option {
        pieces.push(format!("<test-option>{test}</test-option>"));
    }
    if let Some(error) = &options.error_option {
        pieces.push(format!("<error-option>{error}</error-option>"));
    }
    pieces.push(config.to_string());
    pieces.push("</edit-config>".to_string());
    pieces.concat()
}

pub fn copy_config(target: &str, source: &str, with_defaults: Option<WithDefaults>) -> String {
    let mut pieces = vec!["<copy-config>".to_string()];
    pieces.push(format!("<target><{target}/></target>"));
    // The source is either a datastore name or an inline <config> subtree.
    if source.starts_with("<config") {
        pieces.push(format!("<source>{source}</source>"));
    } else {
        pieces.push(format!("<source><{source}/></source>"));
    }
    if let Some(mode) = with_defaults {
        pieces.push(make_with_defaults(mode));
    }
    pieces.push("</copy-config>".to_string());
    pieces.concat()
}

pub fn delete_config(target: &str) -> String {
    format!("<delete-config><target><{target}/></target></delete-config>")
}

pub fn discard_changes() -> String {
    "<discard-changes/>".to_string()
}

pub fn commit(options: &CommitOptions) -> String {
    let mut pieces = vec!["<commit>".to_string()];
    if options.confirmed {
        pieces.push("<confirmed/>".to_string());
    }
    if let Some(timeout) = options.confirm_timeout {
        pieces.push(format!("<confirm-timeout>{timeout}</confirm-timeout>"));
    }
    if let Some(persist) = &options.persist {
        pieces.push(format!("<persist>{persist}</persist>"));
    }
    if let Some(persist_id) = &options.persist_id {
        pieces.push(format!("<persist-id>{persist_id}</persist-id>"));
    }
    pieces.push("</commit>".to_string());
    pieces.concat()
}

pub fn cancel_commit(persist_id: Option<&str>) -> String {
    match persist_id {
        Some(id) => format!("<cancel-commit><persist-id>{id}</persist-id></cancel-commit>"),
        None => "<cancel-commit></cancel-commit>".to_string(),
    }
}

pub fn lock(target: &str) -> String {
    format!("<lock><target><{target}/></target></lock>")
}

pub fn unlock(target: &str) -> String {
    format!("<unlock><target><{target}/></target></unlock>")
}

pub fn kill_session(session_id: u64) -> String {
    format!("<kill-session><session-id>{session_id}</session-id></kill-session>")
}

pub fn close_session() -> String {
    "<close-session/>".to_string()
}

pub fn validate(source: &str) -> String {
    // An inline <config> subtree is passed through; a datastore name is
    // wrapped into an empty element.
    if source.starts_with('<') {
        format!("<validate><source>{source}</source></validate>")
    } else {
        format!("<validate><source><{source}/></source></validate>")
    }
}

pub fn create_subscription(request: &SubscriptionRequest) -> String {
    let mut pieces = vec![format!(r#"<create-subscription xmlns="{NOTIFICATION_NS}">"#)];
    if let Some(stream) = &request.stream {
        pieces.push(format!("<stream>{stream}</stream>"));
    }
    if let Some(filter) = &request.filter {
        pieces.push(filter.clone());
    }
    if let Some(start) = &request.start_time {
        pieces.push(format!("<startTime>{start}</startTime>"));
    }
    if let Some(stop) = &request.stop_time {
        pieces.push(format!("<stopTime>{stop}</stopTime>"));
    }
    pieces.push("</create-subscription>".to_string());
    pieces.concat()
}

fn make_with_defaults(mode: WithDefaults) -> String {
    format!(
        r#"<with-defaults xmlns="{WITH_DEFAULTS_NS}">{}</with-defaults>"#,
        mode.as_str()
    )
}
