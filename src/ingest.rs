// 📥 Ingestion - donor and recipient CSV files into validated records
//
// Headers are matched loosely: case-insensitive, '_' counts as a space, and
// a candidate matches the shortest header containing it. That lets the
// sign-up sheet export ("Pledge units", "Home Email", "Selected") and tidy
// hand-made files ("card_capacity", "home_email") load the same way.
//
// Every row problem is a ValidationError carrying "<file>:<line>".

use crate::error::{Error, Result};
use crate::registry::{DonorRecord, RecipientRecord};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::Path;

// ============================================================================
// HEADER MATCHING
// ============================================================================

const DONOR_EMAIL: &[&str] = &["email"];
const DONOR_NAME: &[&str] = &["name"];
const DONOR_FIRST: &[&str] = &["first"];
const DONOR_LAST: &[&str] = &["last"];
const DONOR_CAPACITY: &[&str] = &["card capacity", "pledge units", "pledge", "capacity", "cards"];
const COMMENTS: &[&str] = &["comments"];

const RECIPIENT_EMAIL: &[&str] = &["home email", "email"];
const RECIPIENT_STORES: &[&str] = &[
    "acceptable stores",
    "stores",
    "selected",
    "store for which you would",
    "store",
];
const RECIPIENT_NAME: &[&str] = &["name"];
const RECIPIENT_NAME_AND_ADDRESS: &[&str] = &["name and address"];
const RECIPIENT_ADDRESS: &[&str] = &["address"];
const RECIPIENT_PHONE: &[&str] = &["phone"];
const RECIPIENT_PHYSICAL: &[&str] = &["physical cards", "no printer or smartphone", "physical"];
const RECIPIENT_WORK_EMAIL: &[&str] = &["work email", "epa email"];
const RECIPIENT_STATUS: &[&str] = &["employment status"];
const RECIPIENT_VALIDITY: &[&str] = &["validity"];

fn normalize_header(header: &str) -> String {
    header
        .replace('_', " ")
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Column lookup over one file's header row
struct Columns {
    headers: Vec<String>,
    source: String,
}

impl Columns {
    fn new(headers: &StringRecord, source: &str) -> Self {
        Columns {
            headers: headers.iter().map(normalize_header).collect(),
            source: source.to_string(),
        }
    }

    /// Exact match first, otherwise the shortest header containing `candidate`
    fn find(&self, candidate: &str) -> Option<usize> {
        if let Some(i) = self.headers.iter().position(|h| h == candidate) {
            return Some(i);
        }
        self.headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.contains(candidate))
            .min_by_key(|(i, h)| (h.len(), *i))
            .map(|(i, _)| i)
    }

    fn find_any(&self, candidates: &[&str]) -> Option<usize> {
        candidates.iter().find_map(|c| self.find(c))
    }

    fn require(&self, candidates: &[&str]) -> Result<usize> {
        self.find_any(candidates).ok_or_else(|| {
            Error::validation(
                format!("{}:1", self.source),
                format!(
                    "no column matching '{}' among [{}]",
                    candidates[0],
                    self.headers.join(", ")
                ),
            )
        })
    }
}

fn cell(record: &StringRecord, column: Option<usize>) -> String {
    column
        .and_then(|i| record.get(i))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn location(source: &str, record: &StringRecord) -> String {
    match record.position() {
        Some(pos) => format!("{}:{}", source, pos.line()),
        None => source.to_string(),
    }
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|v| v.trim().is_empty())
}

// ============================================================================
// CELL PARSERS
// ============================================================================

/// Leading integer of a cell: "5" -> 5, "5x20" -> 5, " 3 cards" -> 3
pub fn initial_int(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Checkbox-style cell: blank / x / true / yes mean what you'd expect
pub fn parse_mark(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "" | "false" | "no" | "n" => Some(false),
        "x" | "true" | "yes" | "y" => Some(true),
        _ => None,
    }
}

/// One cell listing stores, separated by ';' or '|'
pub fn split_stores(text: &str) -> Vec<String> {
    text.split(&[';', '|'][..])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ============================================================================
// DONORS
// ============================================================================

pub fn load_donor_csv(path: &Path) -> Result<Vec<DonorRecord>> {
    let file = File::open(path)?;
    let records = read_donors(file, &path.display().to_string())?;
    tracing::info!(path = %path.display(), rows = records.len(), "read donor file");
    Ok(records)
}

pub fn read_donors<R: Read>(reader: R, source: &str) -> Result<Vec<DonorRecord>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = Columns::new(rdr.headers()?, source);

    let email_col = columns.require(DONOR_EMAIL)?;
    let capacity_col = columns.require(DONOR_CAPACITY)?;
    let comments_col = columns.find_any(COMMENTS);

    // Either a single name column or separate first/last columns
    let first_col = columns.find_any(DONOR_FIRST);
    let last_col = columns.find_any(DONOR_LAST);
    let name_col = match (first_col, last_col) {
        (Some(_), Some(_)) => None,
        _ => Some(columns.require(DONOR_NAME)?),
    };

    let mut donors = Vec::new();
    for row in rdr.records() {
        let record = row?;
        if is_blank(&record) {
            continue;
        }
        let at = location(source, &record);

        let email = cell(&record, Some(email_col));
        if email.is_empty() {
            return Err(Error::validation(at, "donor email is empty"));
        }
        if !email.contains('@') {
            return Err(Error::validation(at, format!("'{}' is not an email address", email)));
        }

        let capacity_text = cell(&record, Some(capacity_col));
        let card_capacity = initial_int(&capacity_text).ok_or_else(|| {
            Error::validation(
                at.clone(),
                format!("card capacity '{}' is not a number", capacity_text),
            )
        })?;

        let name = match name_col {
            Some(col) => cell(&record, Some(col)),
            None => format!("{} {}", cell(&record, first_col), cell(&record, last_col))
                .trim()
                .to_string(),
        };

        donors.push(DonorRecord {
            email,
            name,
            card_capacity,
            comments: cell(&record, comments_col),
        });
    }

    Ok(donors)
}

// ============================================================================
// RECIPIENTS
// ============================================================================

pub fn load_recipient_csv(path: &Path) -> Result<Vec<RecipientRecord>> {
    let file = File::open(path)?;
    let records = read_recipients(file, &path.display().to_string())?;
    tracing::info!(path = %path.display(), rows = records.len(), "read recipient file");
    Ok(records)
}

pub fn read_recipients<R: Read>(reader: R, source: &str) -> Result<Vec<RecipientRecord>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let columns = Columns::new(rdr.headers()?, source);

    let email_col = columns.require(RECIPIENT_EMAIL)?;
    let stores_col = columns.require(RECIPIENT_STORES)?;
    let phone_col = columns.find_any(RECIPIENT_PHONE);
    let physical_col = columns.find_any(RECIPIENT_PHYSICAL);
    let comments_col = columns.find_any(COMMENTS);
    let work_email_col = columns.find_any(RECIPIENT_WORK_EMAIL);
    let status_col = columns.find_any(RECIPIENT_STATUS);
    let validity_col = columns.find_any(RECIPIENT_VALIDITY);

    // Sign-up sheets sometimes collect "Name and Address" in one cell
    let combined_col = columns.find_any(RECIPIENT_NAME_AND_ADDRESS);
    let address_col = columns
        .find_any(RECIPIENT_ADDRESS)
        .filter(|col| Some(*col) != combined_col);
    let name_col = columns
        .find_any(RECIPIENT_NAME)
        .filter(|col| Some(*col) != combined_col || address_col.is_none());

    let mut recipients = Vec::new();
    for row in rdr.records() {
        let record = row?;
        if is_blank(&record) {
            continue;
        }
        let at = location(source, &record);

        let home_email = cell(&record, Some(email_col));
        if home_email.is_empty() {
            return Err(Error::validation(at, "recipient home email is empty"));
        }
        if !home_email.contains('@') {
            return Err(Error::validation(
                at,
                format!("'{}' is not an email address", home_email),
            ));
        }

        let acceptable_stores = split_stores(&cell(&record, Some(stores_col)));
        if acceptable_stores.is_empty() {
            return Err(Error::validation(at, "no acceptable store given"));
        }

        let physical_text = cell(&record, physical_col);
        let physical_cards = parse_mark(&physical_text).ok_or_else(|| {
            Error::validation(
                at.clone(),
                format!("expected blank, 'x', true or false but got '{}'", physical_text),
            )
        })?;

        let (name, address) = match (address_col, combined_col) {
            (None, Some(col)) => split_name_and_address(&cell(&record, Some(col))),
            _ => (cell(&record, name_col), cell(&record, address_col)),
        };

        // Only an explicit "true" confirms a checked sheet; no column means
        // the file was never checked and every row counts
        let valid = match validity_col {
            Some(col) => cell(&record, Some(col)).eq_ignore_ascii_case("true"),
            None => true,
        };

        recipients.push(RecipientRecord {
            home_email,
            work_email: cell(&record, work_email_col),
            acceptable_stores,
            name,
            address,
            phone: cell(&record, phone_col),
            physical_cards,
            comments: cell(&record, comments_col),
            employment_status: cell(&record, status_col),
            valid,
        });
    }

    Ok(recipients)
}

/// "Jane Doe, 12 Main St" -> ("Jane Doe", "12 Main St"); no comma means name only
fn split_name_and_address(text: &str) -> (String, String) {
    match text.split_once(',') {
        Some((name, address)) => (name.trim().to_string(), address.trim().to_string()),
        None => (text.trim().to_string(), String::new()),
    }
}
