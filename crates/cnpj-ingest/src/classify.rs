//! File classifier
//!
//! Extracted file names follow the publisher's convention
//! (`K3241.K03200Y0.D50614.EMPRECSV`, `F.K03200$Z.D50614.CNAECSV`, ...).
//! Each name is matched against a fixed, ordered list of substrings; the
//! first rule that matches wins, and names matching no rule are ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Logical record type, one per destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Company,
    Establishment,
    Partner,
    TaxRegime,
    ActivityCode,
    StatusReason,
    Municipality,
    LegalNature,
    Country,
    Qualification,
}

impl RecordKind {
    /// Load order: the four main groups, then the reference tables
    pub const ALL: [RecordKind; 10] = [
        RecordKind::Company,
        RecordKind::Establishment,
        RecordKind::Partner,
        RecordKind::TaxRegime,
        RecordKind::ActivityCode,
        RecordKind::StatusReason,
        RecordKind::Municipality,
        RecordKind::LegalNature,
        RecordKind::Country,
        RecordKind::Qualification,
    ];

    /// Destination table name
    pub fn table(self) -> &'static str {
        match self {
            RecordKind::Company => "empresa",
            RecordKind::Establishment => "estabelecimento",
            RecordKind::Partner => "socios",
            RecordKind::TaxRegime => "simples",
            RecordKind::ActivityCode => "cnae",
            RecordKind::StatusReason => "motivo",
            RecordKind::Municipality => "municipio",
            RecordKind::LegalNature => "natureza",
            RecordKind::Country => "pais",
            RecordKind::Qualification => "qualificacao",
        }
    }

    /// Two-column code/description lookup tables
    pub fn is_reference(self) -> bool {
        !matches!(
            self,
            RecordKind::Company
                | RecordKind::Establishment
                | RecordKind::Partner
                | RecordKind::TaxRegime
        )
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Substring rules in priority order
const RULES: [(&str, RecordKind); 10] = [
    ("EMPRECSV", RecordKind::Company),
    ("ESTABELE", RecordKind::Establishment),
    ("SOCIOCSV", RecordKind::Partner),
    ("SIMPLES.", RecordKind::TaxRegime),
    ("CNAECSV", RecordKind::ActivityCode),
    ("MOTICSV", RecordKind::StatusReason),
    ("MUNICCSV", RecordKind::Municipality),
    ("NATJUCSV", RecordKind::LegalNature),
    ("PAISCSV", RecordKind::Country),
    ("QUALSCSV", RecordKind::Qualification),
];

/// Bucket for a single file name, if any rule matches
pub fn classify_name(name: &str) -> Option<RecordKind> {
    RULES
        .iter()
        .find(|(needle, _)| name.contains(needle))
        .map(|(_, kind)| *kind)
}

/// Extracted files grouped by record type
#[derive(Debug, Default, Clone)]
pub struct ClassifiedFiles {
    buckets: [Vec<PathBuf>; 10],
    pub unmatched: Vec<PathBuf>,
}

impl ClassifiedFiles {
    /// Files of one kind, sorted by name
    pub fn files(&self, kind: RecordKind) -> &[PathBuf] {
        &self.buckets[kind as usize]
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-empty buckets in load order
    pub fn groups(&self) -> impl Iterator<Item = (RecordKind, &[PathBuf])> {
        RecordKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.files(kind)))
            .filter(|(_, files)| !files.is_empty())
    }
}

/// Classify extracted files by their file name
pub fn classify<P: AsRef<Path>>(paths: &[P]) -> ClassifiedFiles {
    let mut classified = ClassifiedFiles::default();

    for path in paths {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        match classify_name(&name) {
            Some(kind) => classified.buckets[kind as usize].push(path.to_path_buf()),
            None => {
                debug!(file = %path.display(), "No record type matches, ignoring");
                classified.unmatched.push(path.to_path_buf());
            },
        }
    }

    for bucket in classified.buckets.iter_mut() {
        bucket.sort();
    }

    for (kind, files) in classified.groups() {
        info!(table = %kind, files = files.len(), "Classified");
    }
    classified
}

/// Classify every regular file currently in `dir`
pub fn classify_dir(dir: &Path) -> std::io::Result<ClassifiedFiles> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            paths.push(entry.path());
        }
    }
    Ok(classify(&paths))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLISHED_NAMES: [(&str, RecordKind); 10] = [
        ("K3241.K03200Y0.D50614.EMPRECSV", RecordKind::Company),
        ("K3241.K03200Y0.D50614.ESTABELE", RecordKind::Establishment),
        ("K3241.K03200Y0.D50614.SOCIOCSV", RecordKind::Partner),
        ("F.K03200$W.SIMPLES.CSV.D50614", RecordKind::TaxRegime),
        ("F.K03200$Z.D50614.CNAECSV", RecordKind::ActivityCode),
        ("F.K03200$Z.D50614.MOTICSV", RecordKind::StatusReason),
        ("F.K03200$Z.D50614.MUNICCSV", RecordKind::Municipality),
        ("F.K03200$Z.D50614.NATJUCSV", RecordKind::LegalNature),
        ("F.K03200$Z.D50614.PAISCSV", RecordKind::Country),
        ("F.K03200$Z.D50614.QUALSCSV", RecordKind::Qualification),
    ];

    #[test]
    fn test_published_names_classify() {
        for (name, kind) in PUBLISHED_NAMES {
            assert_eq!(classify_name(name), Some(kind), "{}", name);
        }
    }

    #[test]
    fn test_each_name_matches_exactly_one_rule() {
        for (name, _) in PUBLISHED_NAMES {
            let hits = RULES.iter().filter(|(needle, _)| name.contains(needle)).count();
            assert_eq!(hits, 1, "{}", name);
        }
    }

    #[test]
    fn test_unknown_names_are_discarded() {
        let classified = classify(&["LAYOUT.pdf", "K3241.K03200Y0.D50614.EMPRECSV"]);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified.unmatched, vec![PathBuf::from("LAYOUT.pdf")]);
    }

    #[test]
    fn test_groups_follow_load_order() {
        let classified = classify(&[
            "F.K03200$Z.D50614.PAISCSV",
            "K3241.K03200Y1.D50614.ESTABELE",
            "K3241.K03200Y0.D50614.ESTABELE",
            "K3241.K03200Y0.D50614.EMPRECSV",
        ]);

        let order: Vec<RecordKind> = classified.groups().map(|(k, _)| k).collect();
        assert_eq!(
            order,
            vec![RecordKind::Company, RecordKind::Establishment, RecordKind::Country]
        );
        assert_eq!(
            classified.files(RecordKind::Establishment),
            &[
                PathBuf::from("K3241.K03200Y0.D50614.ESTABELE"),
                PathBuf::from("K3241.K03200Y1.D50614.ESTABELE"),
            ]
        );
    }

    #[test]
    fn test_table_names_are_unique() {
        let mut tables: Vec<&str> = RecordKind::ALL.iter().map(|k| k.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 10);
        assert_eq!(RecordKind::ALL.iter().filter(|k| k.is_reference()).count(), 6);
    }
}
