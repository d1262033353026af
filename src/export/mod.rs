use anyhow::{bail, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::duplicates::Duplicates;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    /// Format matching the extension of `path`, if it has a known one.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?;
        [ExportFormat::Json, ExportFormat::Csv]
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(ext))
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => bail!("Unknown export format '{}' (expected json or csv)", other),
        }
    }
}

/// One duplicate group member for export
#[derive(Debug, Serialize)]
pub struct ExportedMember {
    pub group: String,
    pub hash: String,
    pub verdict: String,
    /// Methods with at least one pair score mentioning this member, `;`-separated
    pub methods: String,
}

/// Export every duplicate group member to a file, one row per member
pub fn export_duplicates(dups: &Duplicates, output_path: &Path, format: ExportFormat) -> Result<usize> {
    let members = members_for_export(dups);
    let count = members.len();

    match format {
        ExportFormat::Json => export_json(&members, output_path)?,
        ExportFormat::Csv => export_csv(&members, output_path)?,
    }

    Ok(count)
}

fn members_for_export(dups: &Duplicates) -> Vec<ExportedMember> {
    dups.registry()
        .iter()
        .flat_map(|(key, group)| {
            group.verdicts.iter().map(move |(hash, verdict)| {
                let methods: Vec<&str> = group
                    .sources
                    .iter()
                    .filter(|(_, pairs)| pairs.keys().any(|pair| pair.mentions(hash)))
                    .map(|(method, _)| method.as_str())
                    .collect();
                ExportedMember {
                    group: key.to_string(),
                    hash: hash.to_string(),
                    verdict: verdict.to_string(),
                    methods: methods.join(";"),
                }
            })
        })
        .collect()
}

fn export_json(members: &[ExportedMember], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(members)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn export_csv(members: &[ExportedMember], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record(["group", "hash", "verdict", "methods"])?;
    for member in members {
        wtr.write_record([&member.group, &member.hash, &member.verdict, &member.methods])?;
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duplicates::tests::fixture;
    use crate::duplicates::Verdict::{False, Keep, New};

    #[test]
    fn test_format_parse() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("html".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Csv.extension(), "csv");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ExportFormat::from_path(Path::new("out/dups.JSON")), Some(ExportFormat::Json));
        assert_eq!(ExportFormat::from_path(Path::new("dups.csv")), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::from_path(Path::new("dups.txt")), None);
        assert_eq!(ExportFormat::from_path(Path::new("dups")), None);
    }

    #[test]
    fn test_export_csv() {
        let dups = fixture(vec![(vec!["aaa", "bbb", "ccc"], vec![Keep, New, False])]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dups.csv");

        assert_eq!(export_duplicates(&dups, &path, ExportFormat::Csv).unwrap(), 3);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "group,hash,verdict,methods");
        assert_eq!(lines[1], "\"(aaa, bbb, ccc)\",aaa,keep,percept;cnn");
        assert_eq!(lines[2], "\"(aaa, bbb, ccc)\",bbb,new,percept");
        assert_eq!(lines[3], "\"(aaa, bbb, ccc)\",ccc,false,percept;cnn");
    }

    #[test]
    fn test_export_json() {
        let dups = fixture(vec![(vec!["aaa", "bbb"], vec![New, New])]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dups.json");

        assert_eq!(export_duplicates(&dups, &path, ExportFormat::Json).unwrap(), 2);
        let rows: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rows[0]["hash"], "aaa");
        assert_eq!(rows[1]["verdict"], "new");
        assert_eq!(rows[1]["methods"], "percept");
    }
}
