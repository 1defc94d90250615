//! CLI presentation: text and JSON formatters for command results.

use crate::error::AmbitError;
use crate::setup::ContextPolicy;
use crate::wire::CaptureReport;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;

/// Resolved context policies of one configured resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePolicies {
    pub kind: &'static str,
    pub name: String,
    /// `{name}-ContextService` for executors and thread factories.
    pub context_service: String,
    pub policies: Vec<(String, ContextPolicy)>,
    /// Configured names no registered context type answers to.
    pub dropped: Vec<String>,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AmbitError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_capture_report(report: &CaptureReport, format: &str) -> Result<String, AmbitError> {
    if format == "json" {
        return to_json(report);
    }

    let mut out = format!(
        "Records: {}  Bytes: {}  Warnings: {}\n",
        report.records.len(),
        report.bytes_read,
        report.warnings.len()
    );
    if !report.records.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Offset", "Type", "Version", "Bytes", "Preview", "Decoded"]);
        for record in &report.records {
            let decoded = match (&record.decoded, record.known) {
                (Some(description), _) => description.clone(),
                (None, true) => "<undecodable>".to_string(),
                (None, false) => "<unknown type>".to_string(),
            };
            table.add_row(vec![
                record.offset.to_string(),
                record.type_name.clone(),
                record.version.to_string(),
                record.payload_len.to_string(),
                record.preview.clone(),
                decoded,
            ]);
        }
        out.push_str(&format!("\n{}\n", table));
    }
    if !report.warnings.is_empty() {
        out.push_str(&format!("\nWarnings ({}):", report.warnings.len()));
        for warning in &report.warnings {
            out.push_str(&format!("\n  - {}", warning));
        }
        out.push('\n');
    }
    if let Some(error) = &report.framing_error {
        out.push_str(&format!("\nFraming error: {}\n", error));
    }
    Ok(out.trim_end().to_string())
}

pub fn format_resource_policies(
    resources: &[ResourcePolicies],
    format: &str,
) -> Result<String, AmbitError> {
    if format == "json" {
        return to_json(&resources);
    }
    if resources.is_empty() {
        return Ok("Configuration is valid. No managed resources configured.".to_string());
    }

    let mut out = format!(
        "Configuration is valid. {} managed resource(s).\n",
        resources.len()
    );
    for resource in resources {
        out.push_str(&format!(
            "\n{} {} (context service: {})\n",
            resource.kind, resource.name, resource.context_service
        ));
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Order", "Context type", "Policy"]);
        for (index, (name, policy)) in resource.policies.iter().enumerate() {
            table.add_row(vec![
                (index + 1).to_string(),
                name.clone(),
                policy.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", table));
        if !resource.dropped.is_empty() {
            out.push_str(&format!(
                "  Ignored unknown context types: {}\n",
                resource.dropped.join(", ")
            ));
        }
    }
    Ok(out.trim_end().to_string())
}

pub fn format_validation_errors(errors: &[String]) -> String {
    let mut out = format!("Configuration is invalid ({} error(s)):", errors.len());
    for error in errors {
        out.push_str(&format!("\n  - {}", error));
    }
    out
}
