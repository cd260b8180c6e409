//! Parsing of CSW 2.0.2 responses.
//!
//! Only the few elements the harvester needs are read. Records are sliced
//! out of the response verbatim so the metadata store receives exactly what
//! the remote catalog sent, plus any namespace declarations the record
//! inherited from the response envelope.

use std::collections::BTreeSet;

use geoharvest_core::{AppError, CapabilitiesInfo, RemoteRecord, SearchPage};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, BytesText, Event};
use tracing::warn;

fn xml_error(e: impl std::fmt::Display) -> AppError {
    AppError::ProtocolError(format!("malformed XML: {}", e))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok())
        .map(|value| value.into_owned())
}

fn text(e: &BytesText<'_>) -> Result<String, AppError> {
    Ok(e.unescape().map_err(xml_error)?.trim().to_string())
}

/// Text inside a record. Entities the parser cannot resolve (HTML entities
/// such as `&eacute;` turn up in real catalogs) are kept in raw form.
fn record_text(e: &BytesText<'_>) -> String {
    match e.unescape() {
        Ok(value) => value.trim().to_string(),
        Err(_) => String::from_utf8_lossy(e).trim().to_string(),
    }
}

/// `xmlns` and `xmlns:p` declarations on an element as `(prefix, uri)`.
fn namespace_declarations(e: &BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .flatten()
        .filter_map(|attr| {
            let key = attr.key.as_ref();
            let prefix = if key == b"xmlns" {
                ""
            } else {
                std::str::from_utf8(key.strip_prefix(b"xmlns:")?).ok()?
            };
            let uri = attr.unescape_value().ok()?;
            Some((prefix.to_string(), uri.into_owned()))
        })
        .collect()
}

/// Collects the `ows:ExceptionText` messages of an exception report.
fn exception_report(reader: &mut Reader<&[u8]>) -> AppError {
    let mut messages = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_text = e.local_name().as_ref() == b"ExceptionText",
            Ok(Event::Text(t)) if in_text => {
                if let Ok(message) = text(&t) {
                    messages.push(message);
                }
            }
            Ok(Event::End(_)) => in_text = false,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    if messages.is_empty() {
        AppError::ProtocolError("remote catalog returned an exception report".to_string())
    } else {
        AppError::ProtocolError(format!("remote catalog exception: {}", messages.join("; ")))
    }
}

// =============================================================================
// Capabilities
// =============================================================================

pub(crate) fn parse_capabilities(xml: &str) -> Result<CapabilitiesInfo, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut info = CapabilitiesInfo::default();
    let mut path: Vec<String> = Vec::new();
    let mut operation: Option<String> = None;
    let mut parameter: Option<String> = None;

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = local_name(&e);
                if path.is_empty() {
                    if name == "ExceptionReport" {
                        return Err(exception_report(&mut reader));
                    }
                    if name != "Capabilities" {
                        return Err(AppError::ProtocolError(format!(
                            "expected CSW capabilities, got <{}>",
                            name
                        )));
                    }
                    info.version = attribute(&e, "version");
                }
                match name.as_str() {
                    "Operation" => operation = attribute(&e, "name"),
                    "Parameter" => parameter = attribute(&e, "name"),
                    _ => {}
                }
                path.push(name);
            }
            Event::Empty(e) => {
                let is_post = e.local_name().as_ref() == b"Post";
                if is_post && operation.as_deref() == Some("GetRecords") && info.get_records_url.is_none() {
                    info.get_records_url = attribute(&e, "href");
                }
            }
            Event::Text(t) => {
                let value = text(&t)?;
                let current = path.last().map(String::as_str);
                let in_identification = path.iter().any(|p| p == "ServiceIdentification");
                if current == Some("Title") && in_identification && info.title.is_none() {
                    info.title = Some(value);
                } else if current == Some("Value")
                    && operation.as_deref() == Some("GetRecords")
                    && parameter
                        .as_deref()
                        .is_some_and(|p| p.eq_ignore_ascii_case("outputSchema"))
                {
                    info.output_schemas.push(value);
                }
            }
            Event::End(_) => {
                match path.pop().as_deref() {
                    Some("Operation") => operation = None,
                    Some("Parameter") => parameter = None,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if path.is_empty() && info.version.is_none() && info.title.is_none() {
        return Err(AppError::ProtocolError(
            "empty capabilities document".to_string(),
        ));
    }

    Ok(info)
}

// =============================================================================
// Search results
// =============================================================================

/// Schema tag for a record root element.
fn schema_for(root: &str) -> Option<&'static str> {
    match root {
        "MD_Metadata" => Some("iso19139"),
        "Record" | "SummaryRecord" | "BriefRecord" => Some("dublin-core"),
        _ => None,
    }
}

fn is_catalog_link(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && lower.contains("service=csw")
}

/// Fields gathered while a record element is open.
struct RecordScan {
    start: usize,
    root: String,
    /// Element depth of the record root.
    depth: usize,
    identifier: Option<String>,
    modified: Option<String>,
    links: Vec<String>,
    /// Envelope declarations not repeated on the record root.
    inherited: Vec<(String, String)>,
    /// Prefixes used by the record's elements and attributes.
    prefixes: BTreeSet<String>,
}

impl RecordScan {
    fn new(
        start: usize,
        root: &BytesStart<'_>,
        depth: usize,
        scopes: &[Vec<(String, String)>],
    ) -> Self {
        let own = namespace_declarations(root);
        let mut inherited: Vec<(String, String)> = Vec::new();
        for (prefix, uri) in scopes.iter().rev().flatten() {
            let shadowed = own.iter().chain(&inherited).any(|(p, _)| p == prefix);
            if !shadowed {
                inherited.push((prefix.clone(), uri.clone()));
            }
        }

        let mut scan = Self {
            start,
            root: local_name(root),
            depth,
            identifier: None,
            modified: None,
            links: Vec::new(),
            inherited,
            prefixes: BTreeSet::new(),
        };
        scan.observe_element(root);
        scan
    }

    fn observe_element(&mut self, e: &BytesStart<'_>) {
        let name = e.name();
        self.prefixes.insert(
            name.prefix()
                .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned())
                .unwrap_or_default(),
        );
        for attr in e.attributes().flatten() {
            if let Some(prefix) = attr.key.prefix() {
                let prefix = String::from_utf8_lossy(prefix.as_ref()).into_owned();
                if prefix != "xmlns" && prefix != "xml" {
                    self.prefixes.insert(prefix);
                }
            }
        }
    }

    fn observe_text(&mut self, path: &[String], value: String) {
        let inner = &path[self.depth..];
        let current = inner.last().map(String::as_str);
        let within = |name: &str| inner.iter().any(|p| p == name);

        // ISO citations carry their own nested identifiers; only the file
        // identifier names the record.
        let names_record = within("fileIdentifier")
            || (current == Some("identifier") && schema_for(&self.root) == Some("dublin-core"));
        if self.identifier.is_none() && names_record {
            self.identifier = Some(value.clone());
        }
        if self.modified.is_none() && (within("dateStamp") || current == Some("modified")) {
            self.modified = Some(value.clone());
        }
        if is_catalog_link(&value) && !self.links.contains(&value) {
            self.links.push(value);
        }
    }

    /// The record element as sent, with the inherited declarations it
    /// relies on added to its start tag.
    fn payload(&self, xml: &str, end: usize) -> String {
        let raw = xml.get(self.start..end).unwrap_or_default().trim();
        let missing: Vec<&(String, String)> = self
            .inherited
            .iter()
            .filter(|(prefix, _)| self.prefixes.contains(prefix))
            .collect();
        if missing.is_empty() {
            return raw.to_string();
        }

        let name_end = raw
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(raw.len());
        let mut payload = String::with_capacity(raw.len() + 64 * missing.len());
        payload.push_str(&raw[..name_end]);
        for (prefix, uri) in missing {
            if prefix.is_empty() {
                payload.push_str(&format!(" xmlns=\"{}\"", escape(uri.as_str())));
            } else {
                payload.push_str(&format!(" xmlns:{}=\"{}\"", prefix, escape(uri.as_str())));
            }
        }
        payload.push_str(&raw[name_end..]);
        payload
    }

    fn finish(self, xml: &str, end: usize) -> RemoteRecord {
        let payload = self.payload(xml, end);
        let schema = schema_for(&self.root).map(str::to_string);
        if schema.is_none() {
            warn!(element = %self.root, "Record with unrecognized root element");
        }
        let identifier = self.identifier.unwrap_or_default();
        if identifier.is_empty() {
            warn!(element = %self.root, "Record without identifier");
        }
        RemoteRecord::new(identifier, schema, self.modified, payload).with_linked_endpoints(self.links)
    }
}

fn count_attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<u32>, AppError> {
    match attribute(e, name) {
        None => Ok(None),
        Some(value) => value.trim().parse::<u32>().map(Some).map_err(|_| {
            AppError::ProtocolError(format!("invalid {} attribute: '{}'", name, value))
        }),
    }
}

pub(crate) fn parse_search_results(xml: &str) -> Result<SearchPage, AppError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page: Option<SearchPage> = None;
    let mut results_depth = 0usize;
    let mut path: Vec<String> = Vec::new();
    let mut scan: Option<RecordScan> = None;
    // Namespace declarations per open element, parallel to `path`.
    let mut scopes: Vec<Vec<(String, String)>> = Vec::new();

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = local_name(&e);
                if path.is_empty() && name == "ExceptionReport" {
                    return Err(exception_report(&mut reader));
                }
                if name == "SearchResults" && page.is_none() {
                    page = Some(search_page(&e)?);
                    results_depth = path.len() + 1;
                } else if let Some(scan) = scan.as_mut() {
                    scan.observe_element(&e);
                } else if page.is_some() && path.len() == results_depth {
                    scan = Some(RecordScan::new(before, &e, path.len() + 1, &scopes));
                }
                scopes.push(namespace_declarations(&e));
                path.push(name);
            }
            Event::Empty(e) => {
                let name = local_name(&e);
                if name == "SearchResults" && page.is_none() {
                    page = Some(search_page(&e)?);
                } else if let Some(scan) = scan.as_mut() {
                    scan.observe_element(&e);
                } else if let Some(page) = page.as_mut() {
                    if path.len() == results_depth {
                        let end = reader.buffer_position() as usize;
                        page.records.push(
                            RecordScan::new(before, &e, path.len() + 1, &scopes).finish(xml, end),
                        );
                    }
                }
            }
            Event::Text(t) => {
                if let Some(scan) = scan.as_mut() {
                    scan.observe_text(&path, record_text(&t));
                }
            }
            Event::CData(c) => {
                if let Some(scan) = scan.as_mut() {
                    let value = String::from_utf8_lossy(&c).trim().to_string();
                    scan.observe_text(&path, value);
                }
            }
            Event::End(_) => {
                let closing_depth = path.len();
                path.pop();
                scopes.pop();
                let record_closed = scan.as_ref().is_some_and(|s| s.depth == closing_depth);
                if record_closed {
                    if let (Some(done), Some(page)) = (scan.take(), page.as_mut()) {
                        let end = reader.buffer_position() as usize;
                        page.records.push(done.finish(xml, end));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    page.ok_or_else(|| {
        AppError::ProtocolError("response has no csw:SearchResults element".to_string())
    })
}

fn search_page(e: &BytesStart<'_>) -> Result<SearchPage, AppError> {
    let matched = count_attribute(e, "numberOfRecordsMatched")?.ok_or_else(|| {
        AppError::ProtocolError("SearchResults without numberOfRecordsMatched".to_string())
    })?;
    Ok(SearchPage {
        matched,
        returned: count_attribute(e, "numberOfRecordsReturned")?.unwrap_or_default(),
        next_record: count_attribute(e, "nextRecord")?,
        records: Vec::new(),
    })
}
