use std::collections::BTreeMap;

use image::GrayImage;
use serde::Serialize;

/// The five MRZ document shapes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum MrzType {
    #[serde(rename = "TD1")]
    Td1,
    #[serde(rename = "TD2")]
    Td2,
    #[serde(rename = "TD3")]
    Td3,
    #[serde(rename = "MRVA")]
    Mrva,
    #[serde(rename = "MRVB")]
    Mrvb,
}

impl std::fmt::Display for MrzType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MrzType::Td1 => "TD1",
            MrzType::Td2 => "TD2",
            MrzType::Td3 => "TD3",
            MrzType::Mrva => "MRVA",
            MrzType::Mrvb => "MRVB",
        };
        f.write_str(s)
    }
}

/// A parsed machine-readable zone.
///
/// `mrz_type` is `None` when the line shape matched no known variant; in
/// that case every field is empty and `valid_score` is 0. Otherwise the
/// fields are filled from the fixed per-variant offsets, the three validity
/// vectors record which checks passed, and `valid_score` is the 0..=100
/// aggregate. `valid` is true iff the score is exactly 100.
///
/// `aux` is an open provenance bag (raw OCR text, recovery method tag);
/// `roi` optionally carries the extracted region itself.
#[derive(Debug, Clone, Serialize)]
pub struct MrzRecord {
    pub mrz_type: Option<MrzType>,
    pub valid: bool,
    pub valid_score: u8,
    pub doc_type: String,
    pub country: String,
    pub number: String,
    pub date_of_birth: String,
    pub sex: String,
    pub expiration_date: String,
    pub nationality: String,
    pub names: String,
    pub surname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personal_number: Option<String>,
    pub check_number: String,
    pub check_date_of_birth: String,
    pub check_expiration_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_composite: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_personal_number: Option<String>,
    pub valid_check_digits: Vec<bool>,
    pub valid_line_lengths: Vec<bool>,
    pub valid_misc: Vec<bool>,
    pub aux: BTreeMap<String, String>,
    #[serde(skip)]
    pub roi: Option<GrayImage>,
}

impl Default for MrzRecord {
    fn default() -> Self {
        MrzRecord {
            mrz_type: None,
            valid: false,
            valid_score: 0,
            doc_type: String::new(),
            country: String::new(),
            number: String::new(),
            date_of_birth: String::new(),
            sex: String::new(),
            expiration_date: String::new(),
            nationality: String::new(),
            names: String::new(),
            surname: String::new(),
            optional1: None,
            optional2: None,
            personal_number: None,
            check_number: String::new(),
            check_date_of_birth: String::new(),
            check_expiration_date: String::new(),
            check_composite: None,
            check_personal_number: None,
            valid_check_digits: Vec::new(),
            valid_line_lengths: Vec::new(),
            valid_misc: Vec::new(),
            aux: BTreeMap::new(),
            roi: None,
        }
    }
}

impl MrzRecord {
    /// The "nothing recognized" record.
    pub fn invalid() -> Self {
        MrzRecord::default()
    }

    /// Ordered field -> value pairs for tabular reporting.
    pub fn to_field_map(&self) -> Vec<(&'static str, String)> {
        let mut out: Vec<(&'static str, String)> = Vec::new();
        out.push((
            "mrz_type",
            self.mrz_type.map_or("None".to_string(), |t| t.to_string()),
        ));
        out.push(("valid_score", self.valid_score.to_string()));
        if let Some(raw) = self.aux.get("raw_text") {
            out.push(("raw_text", raw.clone()));
        }
        let Some(tp) = self.mrz_type else {
            return out;
        };

        out.push(("type", self.doc_type.clone()));
        out.push(("country", self.country.clone()));
        out.push(("number", self.number.clone()));
        out.push(("date_of_birth", self.date_of_birth.clone()));
        out.push(("expiration_date", self.expiration_date.clone()));
        out.push(("nationality", self.nationality.clone()));
        out.push(("sex", self.sex.clone()));
        out.push(("names", self.names.clone()));
        out.push(("surname", self.surname.clone()));
        if let Some(v) = &self.optional1 {
            out.push(("optional1", v.clone()));
        }
        if let Some(v) = &self.optional2 {
            out.push(("optional2", v.clone()));
        }
        if let Some(v) = &self.personal_number {
            out.push(("personal_number", v.clone()));
        }
        out.push(("check_number", self.check_number.clone()));
        out.push(("check_date_of_birth", self.check_date_of_birth.clone()));
        out.push(("check_expiration_date", self.check_expiration_date.clone()));
        if let Some(v) = &self.check_composite {
            out.push(("check_composite", v.clone()));
        }
        if let Some(v) = &self.check_personal_number {
            out.push(("check_personal_number", v.clone()));
        }
        out.push(("valid_number", self.valid_check_digits[0].to_string()));
        out.push((
            "valid_date_of_birth",
            self.valid_check_digits[1].to_string(),
        ));
        out.push((
            "valid_expiration_date",
            self.valid_check_digits[2].to_string(),
        ));
        if !matches!(tp, MrzType::Mrva | MrzType::Mrvb) {
            out.push(("valid_composite", self.valid_check_digits[3].to_string()));
        }
        if tp == MrzType::Td3 {
            out.push((
                "valid_personal_number",
                self.valid_check_digits[4].to_string(),
            ));
        }
        if let Some(method) = self.aux.get("method") {
            out.push(("method", method.clone()));
        }
        out
    }
}
