//! Result rendering for the terminal

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use recognizer_api::{ResultEntry, ResultPayload, UsdlField};

/// Results of one frame, as printed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub source: String,
    pub frame: u64,
    pub timestamp: DateTime<Utc>,
    pub results: Vec<ResultEntry>,
}

impl ScanReport {
    pub fn valid_count(&self) -> usize {
        self.results.iter().filter(|r| r.is_valid()).count()
    }
}

fn usdl_label(field: UsdlField) -> &'static str {
    match field {
        UsdlField::CustomerFirstName => "First name",
        UsdlField::CustomerFamilyName => "Family name",
        UsdlField::CustomerMiddleName => "Middle name",
        UsdlField::CustomerIdNumber => "ID number",
        UsdlField::DateOfBirth => "Date of birth",
        UsdlField::DocumentExpirationDate => "Expiration date",
        UsdlField::DocumentIssueDate => "Issue date",
        UsdlField::Sex => "Sex",
        UsdlField::AddressStreet => "Street",
        UsdlField::AddressCity => "City",
        UsdlField::AddressJurisdictionCode => "Jurisdiction",
        UsdlField::AddressPostalCode => "Postal code",
        UsdlField::JurisdictionVehicleClass => "Vehicle class",
        UsdlField::IssuerIdentificationNumber => "Issuer ID",
    }
}

/// Human readable lines describing one result
pub fn describe_entry(entry: &ResultEntry, today: NaiveDate) -> Vec<String> {
    let mut lines = Vec::new();
    if !entry.is_valid() && !matches!(entry.payload(), ResultPayload::Invalid) {
        lines.push(format!("{} result failed validation", entry.kind().as_str()));
    }

    match entry.payload() {
        ResultPayload::Mrtd(mrtd) => {
            lines.push(format!(
                "Travel document {} issued by {}",
                mrtd.document_code, mrtd.issuer
            ));
            lines.push(format!("Document number: {}", mrtd.document_number));
            lines.push(format!("Name: {} {}", mrtd.secondary_id, mrtd.primary_id));
            lines.push(format!("Nationality: {}", mrtd.nationality));
            lines.push(format!("Sex: {}", mrtd.sex_label()));
            match mrtd.birth_date(today) {
                Some(date) => lines.push(format!("Date of birth: {}", date)),
                None => lines.push(format!("Date of birth: {} (unreadable)", mrtd.date_of_birth)),
            }
            match mrtd.expiry_date(today) {
                Some(date) if date.to_naive_date().is_some_and(|d| d < today) => {
                    lines.push(format!("Date of expiry: {} (expired)", date))
                }
                Some(date) => lines.push(format!("Date of expiry: {}", date)),
                None => lines.push(format!("Date of expiry: {} (unreadable)", mrtd.date_of_expiry)),
            }
            if !mrtd.opt1.is_empty() {
                lines.push(format!("Optional data 1: {}", mrtd.opt1));
            }
            if !mrtd.opt2.is_empty() {
                lines.push(format!("Optional data 2: {}", mrtd.opt2));
            }
        }
        ResultPayload::Usdl(usdl) => {
            lines.push("US driver's license".to_string());
            for (field, value) in &usdl.fields {
                lines.push(format!("{}: {}", usdl_label(*field), value));
            }
        }
        ResultPayload::Barcode(barcode) => {
            let mut line = format!("{}: {}", barcode.barcode_type.as_str(), barcode.text);
            if barcode.uncertain {
                line.push_str(" (uncertain)");
            }
            lines.push(line);
        }
        ResultPayload::Invalid => lines.push("nothing recognized".to_string()),
    }
    lines
}

/// Print a report to stdout, as pretty JSON or as text
pub fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let today = report.timestamp.date_naive();
    println!(
        "{} frame {}: {} result(s), {} valid",
        report.source,
        report.frame,
        report.results.len(),
        report.valid_count()
    );
    for (i, entry) in report.results.iter().enumerate() {
        println!("  [{}] {}", i, entry.kind().as_str());
        for line in describe_entry(entry, today) {
            println!("      {}", line);
        }
    }
    Ok(())
}
