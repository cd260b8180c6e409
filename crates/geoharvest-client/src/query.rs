//! GetRecords request documents.

use std::fmt::Write;

use geoharvest_core::{PageRequest, QueryScope, SearchCriteria};
use quick_xml::escape::escape;

pub(crate) const ISO_OUTPUT_SCHEMA: &str = "http://www.isotc211.org/2005/gmd";

/// Builds the `csw:GetRecords` POST body for one page.
pub(crate) fn get_records_body(request: &PageRequest<'_>) -> String {
    let mut xml = String::with_capacity(1024);
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = write!(
        xml,
        concat!(
            r#"<csw:GetRecords xmlns:csw="http://www.opengis.net/cat/csw/2.0.2""#,
            r#" xmlns:ogc="http://www.opengis.net/ogc""#,
            r#" xmlns:gmd="http://www.isotc211.org/2005/gmd""#,
            r#" service="CSW" version="2.0.2" resultType="results""#,
            r#" startPosition="{}" maxRecords="{}" outputSchema="{}">"#
        ),
        request.start_position, request.max_records, ISO_OUTPUT_SCHEMA
    );

    if request.scope == QueryScope::Hierarchy {
        let _ = write!(
            xml,
            r#"<csw:DistributedSearch hopCount="{}"/>"#,
            request.hop_count
        );
    }

    xml.push_str(r#"<csw:Query typeNames="gmd:MD_Metadata">"#);
    xml.push_str("<csw:ElementSetName>full</csw:ElementSetName>");
    if let Some(filter) = filter(request.criteria) {
        xml.push_str(r#"<csw:Constraint version="1.1.0"><ogc:Filter>"#);
        xml.push_str(&filter);
        xml.push_str("</ogc:Filter></csw:Constraint>");
    }
    xml.push_str("</csw:Query></csw:GetRecords>");

    xml
}

/// OGC filter body for the criteria, or `None` when unrestricted.
fn filter(criteria: &SearchCriteria) -> Option<String> {
    let mut conditions: Vec<String> = criteria
        .text_filters()
        .map(|(property, value)| {
            format!(
                concat!(
                    r#"<ogc:PropertyIsLike wildCard="%" singleChar="_" escapeChar="\">"#,
                    "<ogc:PropertyName>{}</ogc:PropertyName>",
                    "<ogc:Literal>%{}%</ogc:Literal>",
                    "</ogc:PropertyIsLike>"
                ),
                property,
                like_literal(value)
            )
        })
        .collect();

    if let Some(min) = criteria.min_scale {
        conditions.push(comparison("PropertyIsGreaterThanOrEqualTo", min));
    }
    if let Some(max) = criteria.max_scale {
        conditions.push(comparison("PropertyIsLessThanOrEqualTo", max));
    }

    match conditions.len() {
        0 => None,
        1 => conditions.pop(),
        _ => Some(format!("<ogc:And>{}</ogc:And>", conditions.concat())),
    }
}

/// Escapes the wildcard and escape characters of a `PropertyIsLike` value
/// so user text matches literally.
fn like_literal(value: &str) -> String {
    let mut literal = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            literal.push('\\');
        }
        literal.push(c);
    }
    escape(literal.as_str()).into_owned()
}

fn comparison(operator: &str, denominator: u64) -> String {
    format!(
        "<ogc:{op}><ogc:PropertyName>Denominator</ogc:PropertyName><ogc:Literal>{}</ogc:Literal></ogc:{op}>",
        denominator,
        op = operator
    )
}
