// 📤 Export - CSV views of a finished round
//
// donation_view.csv   one row per donor who got new cards: mail-merge input
// recipient_view.csv  every recipient with at least one card, for auditing
// shortfall_view.csv  recipients still missing cards
//
// A view that already exists is moved aside to old_<stem>_<n>.csv first.
// A round that placed nothing leaves the last donation view alone.

use crate::entities::Recipient;
use crate::error::Result;
use crate::registry::Registry;
use crate::report::RoundReport;
use csv::Writer;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DONATION_VIEW: &str = "donation_view.csv";
pub const RECIPIENT_VIEW: &str = "recipient_view.csv";
pub const SHORTFALL_VIEW: &str = "shortfall_view.csv";

/// First free `old_<stem>_<n>.<ext>` next to `path`, n counting from 1
pub fn backup_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1;
    loop {
        let candidate = path.with_file_name(format!("old_{}_{}{}", stem, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Move an existing file out of the way. Returns where it went.
pub fn backup_if_needed(path: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let backup = backup_name(path);
    fs::rename(path, &backup)?;
    tracing::debug!(from = %path.display(), to = %backup.display(), "backed up previous view");
    Ok(Some(backup))
}

/// Recipient as one mail-merge cell; '*' marks someone who needs physical cards
fn recipient_cell(recipient: &Recipient, store: &str) -> String {
    let physical = if recipient.physical_cards { "*" } else { "" };
    format!(
        "{} {} {} {}{}",
        recipient.display_name(),
        recipient.home_email,
        recipient.phone,
        store,
        physical
    )
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
}

fn pad(row: &mut Vec<String>, width: usize) {
    while row.len() < width {
        row.push(String::new());
    }
}

// ============================================================================
// VIEWS
// ============================================================================

pub fn write_donation_view(registry: &Registry, report: &RoundReport, path: &Path) -> Result<()> {
    let mut by_donor: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for record in &report.new_assignments {
        let cell = match registry.recipient(&record.recipient) {
            Some(recipient) => recipient_cell(recipient, &record.store),
            None => format!("{} {}", record.recipient, record.store),
        };
        by_donor.entry(record.donor.as_str()).or_default().push(cell);
    }
    let widest = by_donor.values().map(|cells| cells.len()).max().unwrap_or(0);

    let mut headings: Vec<String> = ["Name", "Email", "Capacity", "New Cards", "Total Cards"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for i in 0..widest {
        headings.push(format!("Recipient {}", i + 1));
    }

    backup_if_needed(path)?;
    let mut w = Writer::from_path(path)?;
    w.write_record(&headings)?;
    for (email, cells) in by_donor {
        let (name, capacity, total) = match registry.donor(email) {
            Some(d) => (d.name.clone(), d.capacity, d.committed()),
            None => (String::new(), 0, 0),
        };
        let mut row = vec![
            name,
            email.to_string(),
            capacity.to_string(),
            cells.len().to_string(),
            total.to_string(),
        ];
        row.extend(cells);
        pad(&mut row, headings.len());
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_recipient_view(registry: &Registry, report: &RoundReport, path: &Path) -> Result<()> {
    let new_cards: BTreeMap<&str, usize> = report
        .recipient_tallies
        .iter()
        .map(|t| (t.recipient.as_str(), t.new_cards))
        .collect();
    let widest = registry
        .recipients()
        .values()
        .map(|r| r.filled())
        .max()
        .unwrap_or(0);

    let mut headings: Vec<String> = [
        "Name",
        "Home Email",
        "Work Email",
        "Address",
        "Phone",
        "Stores",
        "Previous Cards",
        "Total Cards",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for i in 0..widest {
        headings.push(format!("Donor {}", i + 1));
    }

    backup_if_needed(path)?;
    let mut w = Writer::from_path(path)?;
    w.write_record(&headings)?;
    for recipient in registry
        .recipients()
        .values()
        .filter(|r| r.valid && r.filled() > 0)
    {
        let fresh = new_cards.get(recipient.home_email.as_str()).copied().unwrap_or(0);
        let stores = format!(
            "{}{}",
            recipient.stores.join("; "),
            if recipient.physical_cards { "*" } else { "" }
        );
        let mut row = vec![
            recipient.name.clone(),
            recipient.home_email.clone(),
            recipient.work_email.clone(),
            recipient.address.clone(),
            recipient.phone.clone(),
            stores,
            (recipient.filled() - fresh).to_string(),
            recipient.filled().to_string(),
        ];
        for slot in recipient.filled_slots() {
            row.push(format!("{} ({})", slot.donor, slot.store));
        }
        pad(&mut row, headings.len());
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_shortfall_view(registry: &Registry, report: &RoundReport, path: &Path) -> Result<()> {
    backup_if_needed(path)?;
    let mut w = Writer::from_path(path)?;
    w.write_record(["Home Email", "Name", "Stores", "Filled", "Missing"])?;
    for shortfall in &report.shortfalls {
        let (name, stores) = match registry.recipient(&shortfall.recipient) {
            Some(r) => (r.name.clone(), r.stores.join("; ")),
            None => (String::new(), String::new()),
        };
        w.write_record([
            shortfall.recipient.clone(),
            name,
            stores,
            shortfall.filled.to_string(),
            shortfall.missing.to_string(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

/// Write all three views into `dir`. Returns the paths written.
pub fn write_round_exports(registry: &Registry, report: &RoundReport, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let donation = dir.join(DONATION_VIEW);
    let recipient = dir.join(RECIPIENT_VIEW);
    let shortfall = dir.join(SHORTFALL_VIEW);

    let mut written = Vec::new();
    if report.is_noop() {
        tracing::info!(path = %donation.display(), "no new cards, donation view left as is");
    } else {
        write_donation_view(registry, report, &donation)?;
        written.push(donation);
    }
    write_recipient_view(registry, report, &recipient)?;
    write_shortfall_view(registry, report, &shortfall)?;
    written.push(recipient);
    written.push(shortfall);

    tracing::info!(dir = %dir.display(), round = report.round, "wrote round views");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchingEngine;
    use crate::registry::{DonorRecord, RecipientRecord};

    fn matched() -> (Registry, RoundReport) {
        let mut registry = Registry::new();
        registry
            .upsert_donors(&[DonorRecord::new("dana@example.com", "Dana", 2)])
            .unwrap();
        let mut rita = RecipientRecord::new("rita@example.com", &["Petco"]).with_name("Rita");
        rita.address = "1 Elm St".to_string();
        rita.physical_cards = true;
        registry
            .upsert_recipients(&[rita, RecipientRecord::new("sam@example.com", &["Petco"])])
            .unwrap();
        let report = MatchingEngine::new().run_round(&mut registry).unwrap();
        (registry, report)
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .unwrap();
        rdr.records()
            .map(|r| r.unwrap().iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_backup_name_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("donation_view.csv");
        assert_eq!(backup_name(&path), dir.path().join("old_donation_view_1.csv"));

        fs::write(dir.path().join("old_donation_view_1.csv"), "x").unwrap();
        assert_eq!(backup_name(&path), dir.path().join("old_donation_view_2.csv"));
    }

    #[test]
    fn test_write_round_exports() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, report) = matched();

        let written = write_round_exports(&registry, &report, dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let donations = read_rows(&dir.path().join(DONATION_VIEW));
        assert_eq!(donations[0][..5], ["Name", "Email", "Capacity", "New Cards", "Total Cards"]);
        assert_eq!(donations[0][5], "Recipient 1");
        assert_eq!(donations[1][1], "dana@example.com");
        assert_eq!(donations[1][3], "2");
        assert_eq!(donations[1][5], "Rita, 1 Elm St rita@example.com Petco*");

        let recipients = read_rows(&dir.path().join(RECIPIENT_VIEW));
        assert_eq!(recipients.len(), 3);
        assert_eq!(recipients[1][1], "rita@example.com");
        assert_eq!(recipients[1][2], "");
        assert_eq!(recipients[1][6], "0");
        assert_eq!(recipients[1][8], "dana@example.com (Petco)");

        let shortfalls = read_rows(&dir.path().join(SHORTFALL_VIEW));
        assert_eq!(shortfalls.len(), 3);
        assert_eq!(shortfalls[1][4], "9");

        println!("✅ Export test PASSED");
    }

    #[test]
    fn test_existing_views_are_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let (registry, report) = matched();

        write_round_exports(&registry, &report, dir.path()).unwrap();
        write_round_exports(&registry, &report, dir.path()).unwrap();

        assert!(dir.path().join("old_donation_view_1.csv").exists());
        assert!(dir.path().join("old_recipient_view_1.csv").exists());
        assert!(dir.path().join("old_shortfall_view_1.csv").exists());
        assert!(dir.path().join(DONATION_VIEW).exists());
    }

    #[test]
    fn test_noop_round_keeps_donation_view() {
        let dir = tempfile::tempdir().unwrap();
        let (mut registry, report) = matched();
        write_round_exports(&registry, &report, dir.path()).unwrap();
        let before = fs::read(dir.path().join(DONATION_VIEW)).unwrap();

        let rerun = MatchingEngine::new().run_round(&mut registry).unwrap();
        assert!(rerun.is_noop());
        let written = write_round_exports(&registry, &rerun, dir.path()).unwrap();

        assert!(!written.contains(&dir.path().join(DONATION_VIEW)));
        assert_eq!(fs::read(dir.path().join(DONATION_VIEW)).unwrap(), before);
        assert!(!dir.path().join("old_donation_view_1.csv").exists());
    }

    #[test]
    fn test_ineligible_recipients_stay_out_of_views() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = Registry::new();
        registry
            .upsert_donors(&[DonorRecord::new("dana@example.com", "Dana", 2)])
            .unwrap();
        let mut pending = RecipientRecord::new("pat@example.com", &["Petco"]);
        pending.valid = false;
        let mut rita = RecipientRecord::new("rita@example.com", &["Petco"]);
        rita.work_email = "rita@work.example".to_string();
        registry.upsert_recipients(&[pending, rita]).unwrap();
        let report = MatchingEngine::new().run_round(&mut registry).unwrap();

        write_round_exports(&registry, &report, dir.path()).unwrap();

        let recipients = read_rows(&dir.path().join(RECIPIENT_VIEW));
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[1][2], "rita@work.example");
        let shortfalls = read_rows(&dir.path().join(SHORTFALL_VIEW));
        assert!(shortfalls.iter().all(|row| row[0] != "pat@example.com"));
    }
}
