//! Thin helpers over `roxmltree` for the handful of XML lookups the
//! protocol engine needs.
//!
//! Messages are kept as raw text throughout the crate; these helpers
//! parse on demand and, where a subtree has to be returned to the
//! caller, slice it back out of the raw text via the node's byte range.
//! Tag matching is on local names: NETCONF peers disagree often enough
//! about namespace prefixes that lenient matching is the practical
//! choice.

use roxmltree::Document;

use crate::error::{NetconfError, RpcErrorDetail};

/// Parses a message into a DOM, mapping parse failures to protocol errors.
pub(crate) fn parse(text: &str) -> Result<Document<'_>, NetconfError> {
    Document::parse(text).map_err(|err| NetconfError::Protocol(format!("invalid xml: {err}")))
}

/// Local name of the document's root element.
pub(crate) fn root_name<'a>(doc: &'a Document<'_>) -> &'a str {
    doc.root_element().tag_name().name()
}

/// The `message-id` attribute of the root element, if present and numeric.
pub(crate) fn message_id(doc: &Document<'_>) -> Option<u64> {
    doc.root_element()
        .attribute("message-id")
        .and_then(|id| id.trim().parse().ok())
}

/// Capability URIs advertised in a `<hello>`.
pub(crate) fn capabilities_from_hello(doc: &Document<'_>) -> Vec<String> {
    doc.root_element()
        .descendants()
        .filter(|node| node.has_tag_name_local("capability"))
        .filter_map(|node| node.text())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .collect()
}

/// The `<session-id>` assigned by the peer's `<hello>`.
pub(crate) fn session_id_from_hello(doc: &Document<'_>) -> Option<u64> {
    doc.root_element()
        .children()
        .find(|node| node.has_tag_name_local("session-id"))
        .and_then(|node| node.text())
        .and_then(|text| text.trim().parse().ok())
}

/// Extracts the first `<rpc-error>` of a reply, if any.
///
/// `raw` must be the exact text `doc` was parsed from, so that the
/// `<error-info>` subtree can be sliced out verbatim.
pub(crate) fn rpc_error_detail(raw: &str, doc: &Document<'_>) -> Option<RpcErrorDetail> {
    let error = doc
        .root_element()
        .children()
        .find(|node| node.has_tag_name_local("rpc-error"))?;

    let child_text = |name: &str| {
        error
            .children()
            .find(|node| node.has_tag_name_local(name))
            .and_then(|node| node.text())
            .map(|text| text.trim().to_string())
    };

    let info = error
        .children()
        .find(|node| node.has_tag_name_local("error-info"))
        .map(|node| raw[node.range()].to_string());

    Some(RpcErrorDetail {
        reply_raw: raw.to_string(),
        error_type: child_text("error-type"),
        tag: child_text("error-tag"),
        severity: child_text("error-severity"),
        message: child_text("error-message"),
        info,
    })
}

/// Raw text of the reply's `<data>` element (base:1.0 or NMDA), if any.
pub(crate) fn data_element_raw(raw: &str, doc: &Document<'_>) -> Option<String> {
    doc.root_element()
        .children()
        .find(|node| node.has_tag_name_local("data"))
        .map(|node| raw[node.range()].to_string())
}

/// Local-name tag matching, namespace-agnostic.
trait LocalName {
    fn has_tag_name_local(&self, name: &str) -> bool;
}

impl LocalName for roxmltree::Node<'_, '_> {
    fn has_tag_name_local(&self, name: &str) -> bool {
        self.is_element() && self.tag_name().name() == name
    }
}
