//! Recognition results: a closed set of payload kinds plus a validity flag

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{RecognizerError, Result};

/// Kind of recognizer that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Mrtd,
    Usdl,
    Barcode,
    /// Nothing usable was recognized
    Invalid,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Mrtd => "mrtd",
            ResultKind::Usdl => "usdl",
            ResultKind::Barcode => "barcode",
            ResultKind::Invalid => "invalid",
        }
    }
}

/// Fields read from the machine readable zone of a travel document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MrtdFields {
    pub document_code: String,
    pub issuer: String,
    pub document_number: String,
    pub primary_id: String,
    pub secondary_id: String,
    pub nationality: String,
    pub sex: String,
    /// YYMMDD
    pub date_of_birth: String,
    /// YYMMDD
    pub date_of_expiry: String,
    pub opt1: String,
    pub opt2: String,
    /// Raw MRZ lines separated by newlines
    pub raw: String,
}

impl MrtdFields {
    pub fn sex_label(&self) -> &'static str {
        match self.sex.as_str() {
            "M" => "MALE",
            "F" => "FEMALE",
            _ => "UNSPECIFIED",
        }
    }

    pub fn birth_date(&self, today: NaiveDate) -> Option<MrzDate> {
        MrzDate::parse(&self.date_of_birth, DateKind::Birth, today)
    }

    pub fn expiry_date(&self, today: NaiveDate) -> Option<MrzDate> {
        MrzDate::parse(&self.date_of_expiry, DateKind::Expiry, today)
    }
}

/// Which century rule applies to a two digit MRZ year
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    /// Never in the future
    Birth,
    /// May lie in the future
    Expiry,
}

/// Date decoded from a six digit MRZ field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MrzDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl MrzDate {
    /// Parse `YYMMDD`, choosing the century from the date kind and today's year
    pub fn parse(field: &str, kind: DateKind, today: NaiveDate) -> Option<Self> {
        if field.len() < 6 || !field.is_char_boundary(6) {
            return None;
        }
        let digits = &field[..6];
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let yy: i32 = digits[0..2].parse().ok()?;
        let month: u32 = digits[2..4].parse().ok()?;
        let day: u32 = digits[4..6].parse().ok()?;

        let year = match kind {
            DateKind::Expiry if yy > 80 => 1900 + yy,
            DateKind::Expiry => 2000 + yy,
            DateKind::Birth if yy + 2000 > today.year() => 1900 + yy,
            DateKind::Birth => 2000 + yy,
        };

        Some(Self { year, month, day })
    }

    pub fn to_naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
    }
}

impl fmt::Display for MrzDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.", self.year, self.month, self.day)
    }
}

/// Keys of the AAMVA driver's license fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsdlField {
    CustomerFirstName,
    CustomerFamilyName,
    CustomerMiddleName,
    CustomerIdNumber,
    DateOfBirth,
    DocumentExpirationDate,
    DocumentIssueDate,
    Sex,
    AddressStreet,
    AddressCity,
    AddressJurisdictionCode,
    AddressPostalCode,
    JurisdictionVehicleClass,
    IssuerIdentificationNumber,
}

/// Parsed driver's license payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsdlFields {
    pub fields: BTreeMap<UsdlField, String>,
}

impl UsdlFields {
    pub fn get(&self, field: UsdlField) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

/// Barcode symbologies reported by the barcode recognizers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeType {
    Aztec,
    Code128,
    Code39,
    DataMatrix,
    Ean13,
    Ean8,
    Itf,
    Pdf417,
    QrCode,
    UpcA,
    UpcE,
}

impl BarcodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarcodeType::Aztec => "Aztec",
            BarcodeType::Code128 => "Code 128",
            BarcodeType::Code39 => "Code 39",
            BarcodeType::DataMatrix => "Data Matrix",
            BarcodeType::Ean13 => "EAN 13",
            BarcodeType::Ean8 => "EAN 8",
            BarcodeType::Itf => "ITF",
            BarcodeType::Pdf417 => "PDF417",
            BarcodeType::QrCode => "QR code",
            BarcodeType::UpcA => "UPC A",
            BarcodeType::UpcE => "UPC E",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarcodeData {
    pub barcode_type: BarcodeType,
    pub text: String,
    #[serde(default)]
    pub raw: Vec<u8>,
    /// Decoded although some checks failed
    #[serde(default)]
    pub uncertain: bool,
}

/// Recognizer specific payload of a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPayload {
    Mrtd(MrtdFields),
    Usdl(UsdlFields),
    Barcode(BarcodeData),
    Invalid,
}

impl ResultPayload {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResultPayload::Mrtd(_) => ResultKind::Mrtd,
            ResultPayload::Usdl(_) => ResultKind::Usdl,
            ResultPayload::Barcode(_) => ResultKind::Barcode,
            ResultPayload::Invalid => ResultKind::Invalid,
        }
    }
}

/// One recognition result.
///
/// Validity is tracked apart from the kind: an MRTD result whose check digits
/// failed is still an MRTD result, but `is_valid` returns false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub valid: bool,
    pub payload: ResultPayload,
}

impl ResultEntry {
    pub fn new(valid: bool, payload: ResultPayload) -> Self {
        Self { valid, payload }
    }

    /// Placeholder for "nothing recognized"
    pub fn empty() -> Self {
        Self {
            valid: false,
            payload: ResultPayload::Invalid,
        }
    }

    pub fn kind(&self) -> ResultKind {
        self.payload.kind()
    }

    pub fn is_kind(&self, kind: ResultKind) -> bool {
        self.kind() == kind
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn payload(&self) -> &ResultPayload {
        &self.payload
    }

    pub fn mrtd(&self) -> Result<&MrtdFields> {
        match &self.payload {
            ResultPayload::Mrtd(fields) => Ok(fields),
            _ => Err(self.mismatch(ResultKind::Mrtd)),
        }
    }

    pub fn usdl(&self) -> Result<&UsdlFields> {
        match &self.payload {
            ResultPayload::Usdl(fields) => Ok(fields),
            _ => Err(self.mismatch(ResultKind::Usdl)),
        }
    }

    pub fn barcode(&self) -> Result<&BarcodeData> {
        match &self.payload {
            ResultPayload::Barcode(data) => Ok(data),
            _ => Err(self.mismatch(ResultKind::Barcode)),
        }
    }

    fn mismatch(&self, expected: ResultKind) -> RecognizerError {
        RecognizerError::KindMismatch {
            expected: expected.as_str(),
            actual: self.kind().as_str(),
        }
    }
}

/// Ordered results of one recognize call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultList {
    entries: Vec<ResultEntry>,
}

impl ResultList {
    pub fn new(entries: Vec<ResultEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<&ResultEntry> {
        self.entries.get(index).ok_or_else(|| {
            RecognizerError::InvalidArgument(format!(
                "result index {} out of range ({} results)",
                index,
                self.entries.len()
            ))
        })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultEntry> {
        self.entries.iter()
    }

    /// First entry that passed validation
    pub fn first_valid(&self) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| e.is_valid())
    }

    pub fn has_valid(&self) -> bool {
        self.first_valid().is_some()
    }
}

impl<'a> IntoIterator for &'a ResultList {
    type Item = &'a ResultEntry;
    type IntoIter = std::slice::Iter<'a, ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl IntoIterator for ResultList {
    type Item = ResultEntry;
    type IntoIter = std::vec::IntoIter<ResultEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
