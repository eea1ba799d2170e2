use crate::error::StoreError;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use toml::{Table, Value};
use tracing::{debug, info, warn};

const REPO_KEY: &str = "repo";
const ISSUE_NUMBER_KEY: &str = "issue_number";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    pub alias: String,
    pub repo: String,
    pub issue_number: u64,
}

/// A section that could not be read as an alias record. It is kept verbatim
/// so saving the store never loses hand-edited data.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidSection {
    pub alias: String,
    pub reason: String,
    raw: Value,
}

impl InvalidSection {
    pub fn repo(&self) -> Option<&str> {
        self.raw.get(REPO_KEY).and_then(Value::as_str)
    }

    pub fn issue_number(&self) -> Option<String> {
        match self.raw.get(ISSUE_NUMBER_KEY)? {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Record(AliasRecord),
    Invalid(InvalidSection),
}

impl Entry {
    pub fn alias(&self) -> &str {
        match self {
            Entry::Record(record) => &record.alias,
            Entry::Invalid(section) => &section.alias,
        }
    }
}

/// Alias store backed by a sectioned TOML file, one table per alias.
///
/// Entries keep the order they have on disk; new aliases are appended.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    entries: Vec<Entry>,
}

impl Store {
    /// Reads the store, treating a missing file as an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            debug!(path = %path.display(), "config file absent, using empty store");
            return Ok(Self {
                path: path.to_path_buf(),
                entries: Vec::new(),
            });
        }

        let content = fs::read_to_string(path)?;
        let entries = parse_entries(&content, path)?;
        debug!(path = %path.display(), entries = entries.len(), "loaded alias store");
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Reads the store, failing if `init` has not been run.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::ConfigMissing {
                path: path.to_path_buf(),
            });
        }
        Self::load(path)
    }

    /// Creates an empty store file. Returns `false` if one already existed.
    pub fn init(path: &Path) -> Result<bool, StoreError> {
        if let Some(parent) = non_empty_parent(path) {
            fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(_) => {
                info!(path = %path.display(), "created config file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every section in file order, readable or not.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Readable alias records in file order.
    pub fn list(&self) -> Vec<&AliasRecord> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Record(record) => Some(record),
                Entry::Invalid(_) => None,
            })
            .collect()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.iter().any(|e| e.alias() == alias)
    }

    pub fn get(&self, alias: &str) -> Result<&AliasRecord, StoreError> {
        match self.entries.iter().find(|e| e.alias() == alias) {
            Some(Entry::Record(record)) => Ok(record),
            Some(Entry::Invalid(section)) => Err(StoreError::InvalidEntry {
                alias: section.alias.clone(),
                reason: section.reason.clone(),
            }),
            None => Err(StoreError::AliasNotFound(alias.to_string())),
        }
    }

    pub fn add(&mut self, alias: &str, repo: &str, issue_number: u64) -> Result<(), StoreError> {
        if self.contains(alias) {
            return Err(StoreError::AliasExists(alias.to_string()));
        }
        if issue_number == 0 {
            return Err(StoreError::InvalidIssueNumber);
        }

        self.entries.push(Entry::Record(AliasRecord {
            alias: alias.to_string(),
            repo: repo.to_string(),
            issue_number,
        }));
        if let Err(e) = self.save() {
            self.entries.pop();
            return Err(e);
        }
        info!(alias, repo, issue_number, "added alias");
        Ok(())
    }

    /// Removes the section for `alias`, including one that could not be read.
    pub fn remove(&mut self, alias: &str) -> Result<Entry, StoreError> {
        let index = self
            .entries
            .iter()
            .position(|e| e.alias() == alias)
            .ok_or_else(|| StoreError::AliasNotFound(alias.to_string()))?;

        let removed = self.entries.remove(index);
        if let Err(e) = self.save() {
            self.entries.insert(index, removed);
            return Err(e);
        }
        info!(alias, "removed alias");
        Ok(removed)
    }

    /// Rewrites the whole file through a temp file and an atomic rename.
    pub fn save(&self) -> Result<(), StoreError> {
        let content = render_entries(&self.entries)?;
        let dir = match non_empty_parent(&self.path) {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                parent
            }
            None => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "saved alias store");
        Ok(())
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn parse_entries(content: &str, path: &Path) -> Result<Vec<Entry>, StoreError> {
    let table: Table = content.parse().map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(table
        .into_iter()
        .map(|(alias, value)| match parse_record(&alias, &value) {
            Ok(record) => Entry::Record(record),
            Err(reason) => {
                warn!(alias = %alias, reason, "unreadable section in config file");
                Entry::Invalid(InvalidSection {
                    alias,
                    reason: reason.to_string(),
                    raw: value,
                })
            }
        })
        .collect())
}

fn parse_record(alias: &str, value: &Value) -> Result<AliasRecord, &'static str> {
    let section = value.as_table().ok_or("expected a section")?;

    let repo = section
        .get(REPO_KEY)
        .and_then(Value::as_str)
        .ok_or("missing 'repo'")?
        .to_string();

    let issue_number = match section.get(ISSUE_NUMBER_KEY) {
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(Value::Integer(i)) => u64::try_from(*i).ok(),
        Some(_) => None,
        None => return Err("missing 'issue_number'"),
    }
    .filter(|n| *n > 0)
    .ok_or("'issue_number' is not a positive integer")?;

    Ok(AliasRecord {
        alias: alias.to_string(),
        repo,
        issue_number,
    })
}

fn render_entries(entries: &[Entry]) -> Result<String, StoreError> {
    let mut table = Table::new();
    for entry in entries {
        let value = match entry {
            Entry::Record(record) => {
                let mut section = Table::new();
                section.insert(REPO_KEY.to_string(), Value::String(record.repo.clone()));
                section.insert(
                    ISSUE_NUMBER_KEY.to_string(),
                    Value::String(record.issue_number.to_string()),
                );
                Value::Table(section)
            }
            Entry::Invalid(section) => section.raw.clone(),
        };
        table.insert(entry.alias().to_string(), value);
    }
    Ok(toml::to_string(&table)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn fresh_store(temp: &assert_fs::TempDir) -> Store {
        let path = temp.child(".ob_config");
        Store::init(path.path()).unwrap();
        Store::open(path.path()).unwrap()
    }

    fn aliases(store: &Store) -> Vec<&str> {
        store.entries().iter().map(Entry::alias).collect()
    }

    #[test]
    fn test_add_then_get() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);

        store.add("t1.38", "owner/repo", 63683)?;

        let record = store.get("t1.38")?;
        assert_eq!(record.repo, "owner/repo");
        assert_eq!(record.issue_number, 63683);

        let reloaded = Store::open(store.path())?;
        assert_eq!(reloaded.get("t1.38")?, record);
        Ok(())
    }

    #[test]
    fn test_add_writes_string_encoded_section() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("t1.38", "owner/repo", 63683)?;

        let content = fs::read_to_string(store.path())?;
        let table: Table = content.parse()?;
        let section = table.get("t1.38").and_then(Value::as_table).unwrap();
        assert_eq!(section.get("repo").and_then(Value::as_str), Some("owner/repo"));
        assert_eq!(section.get("issue_number").and_then(Value::as_str), Some("63683"));
        Ok(())
    }

    #[test]
    fn test_add_existing_alias_fails_and_keeps_original() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("paddle", "PaddlePaddle/Paddle", 1)?;

        let err = store.add("paddle", "other/repo", 2).unwrap_err();
        assert!(matches!(err, StoreError::AliasExists(ref a) if a == "paddle"));

        let reloaded = Store::open(store.path())?;
        let record = reloaded.get("paddle")?;
        assert_eq!(record.repo, "PaddlePaddle/Paddle");
        assert_eq!(record.issue_number, 1);
        assert_eq!(reloaded.list().len(), 1);
        Ok(())
    }

    #[test]
    fn test_add_rejects_zero_issue_number() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);

        let err = store.add("zero", "owner/repo", 0).unwrap_err();
        assert!(matches!(err, StoreError::InvalidIssueNumber));
        assert!(store.list().is_empty());
        Ok(())
    }

    #[test]
    fn test_remove_missing_alias_leaves_store_unchanged() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("keep", "owner/repo", 7)?;
        let before = fs::read_to_string(store.path())?;

        let err = store.remove("missing").unwrap_err();
        assert!(matches!(err, StoreError::AliasNotFound(ref a) if a == "missing"));

        assert_eq!(fs::read_to_string(store.path())?, before);
        assert_eq!(aliases(&store), vec!["keep"]);
        Ok(())
    }

    #[test]
    fn test_remove_then_get_fails() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("gone", "owner/repo", 3)?;

        let removed = store.remove("gone")?;
        assert!(matches!(removed, Entry::Record(ref r) if r.issue_number == 3));
        assert!(matches!(store.get("gone"), Err(StoreError::AliasNotFound(_))));

        let reloaded = Store::open(store.path())?;
        assert!(matches!(reloaded.get("gone"), Err(StoreError::AliasNotFound(_))));
        Ok(())
    }

    #[test]
    fn test_list_fresh_store_is_empty() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let store = fresh_store(&temp);
        assert!(store.list().is_empty());
        Ok(())
    }

    #[test]
    fn test_round_trip_preserves_records_and_order() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("typos 升级到 1.38.1", "PaddlePaddle/Paddle", 63683)?;
        store.add("a.b.c", "owner/a", 1)?;
        store.add("ünïcødé", "owner/b", 2)?;
        store.add("plain", "owner/c", 3)?;

        let reloaded = Store::open(store.path())?;
        assert_eq!(reloaded.list(), store.list());
        assert_eq!(
            aliases(&reloaded),
            vec!["typos 升级到 1.38.1", "a.b.c", "ünïcødé", "plain"]
        );
        Ok(())
    }

    #[test]
    fn test_round_trip_single_and_empty() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.save()?;
        assert!(Store::open(store.path())?.list().is_empty());

        store.add("only", "owner/repo", 42)?;
        let reloaded = Store::open(store.path())?;
        assert_eq!(reloaded.list(), store.list());
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_is_empty() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");

        let store = Store::load(config_file.path())?;
        assert!(store.list().is_empty());
        config_file.assert(predicates::path::missing());
        Ok(())
    }

    #[test]
    fn test_open_nonexistent_is_config_missing() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");

        let err = Store::open(config_file.path()).unwrap_err();
        assert!(matches!(err, StoreError::ConfigMissing { .. }));
        assert!(err.to_string().contains("ob init"));
        Ok(())
    }

    #[test]
    fn test_init_creates_parents_and_is_idempotent() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child("nested/dir/.ob_config");

        assert!(Store::init(config_file.path())?);
        config_file.assert(predicates::path::is_file());

        let mut store = Store::open(config_file.path())?;
        store.add("kept", "owner/repo", 5)?;

        assert!(!Store::init(config_file.path())?);
        assert_eq!(Store::open(config_file.path())?.get("kept")?.issue_number, 5);
        Ok(())
    }

    #[test]
    fn test_reads_hand_written_file() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str(
            "[\"t1.38\"]\nrepo = \"owner/repo\"\nissue_number = \"63683\"\n\n\
             [numeric]\nrepo = \"owner/other\"\nissue_number = 12\n",
        )?;

        let store = Store::open(config_file.path())?;
        assert_eq!(aliases(&store), vec!["t1.38", "numeric"]);
        assert_eq!(store.get("numeric")?.issue_number, 12);
        Ok(())
    }

    #[test]
    fn test_invalid_section_only_fails_its_own_alias() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str(
            "[good]\nrepo = \"owner/good\"\nissue_number = \"1\"\n\n\
             [bad]\nrepo = \"o/r\"\n",
        )?;

        let store = Store::open(config_file.path())?;
        assert_eq!(aliases(&store), vec!["good", "bad"]);
        assert_eq!(store.list().len(), 1);
        assert_eq!(store.get("good")?.repo, "owner/good");

        let err = store.get("bad").unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidEntry { ref alias, ref reason }
                if alias == "bad" && reason == "missing 'issue_number'"
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_section_survives_add_and_can_be_removed() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str("[broken]\nrepo = \"owner/repo\"\nissue_number = \"abc\"\n")?;

        let mut store = Store::open(config_file.path())?;
        let Entry::Invalid(section) = &store.entries()[0] else {
            panic!("expected an invalid section");
        };
        assert_eq!(section.repo(), Some("owner/repo"));
        assert_eq!(section.issue_number().as_deref(), Some("abc"));

        store.add("fresh", "owner/fresh", 2)?;
        let reloaded = Store::open(config_file.path())?;
        assert_eq!(aliases(&reloaded), vec!["broken", "fresh"]);
        assert!(matches!(reloaded.entries()[0], Entry::Invalid(_)));

        assert!(matches!(store.add("broken", "x/y", 3), Err(StoreError::AliasExists(_))));

        let removed = store.remove("broken")?;
        assert!(matches!(removed, Entry::Invalid(_)));
        let reloaded = Store::open(config_file.path())?;
        assert_eq!(aliases(&reloaded), vec!["fresh"]);
        Ok(())
    }

    #[test]
    fn test_missing_repo_is_invalid() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str("[norepo]\nissue_number = \"1\"\n")?;

        let store = Store::open(config_file.path())?;
        let err = store.get("norepo").unwrap_err();
        assert!(err.to_string().contains("missing 'repo'"));
        Ok(())
    }

    #[test]
    fn test_failed_save_rolls_back_add() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let blocker = temp.child("blocker");
        blocker.write_str("not a directory")?;

        let mut store = Store::load(&blocker.path().join(".ob_config"))?;
        assert!(store.add("lost", "owner/repo", 1).is_err());
        assert!(store.list().is_empty());
        assert!(!store.contains("lost"));
        Ok(())
    }

    #[test]
    fn test_failed_save_rolls_back_remove() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let mut store = fresh_store(&temp);
        store.add("first", "owner/a", 1)?;
        store.add("second", "owner/b", 2)?;

        let blocker = temp.child("blocker");
        blocker.write_str("not a directory")?;
        store.path = blocker.path().join(".ob_config");

        assert!(store.remove("first").is_err());
        assert_eq!(aliases(&store), vec!["first", "second"]);
        Ok(())
    }

    #[test]
    fn test_malformed_file_is_parse_error() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str("[unterminated\n")?;

        let err = Store::open(config_file.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        Ok(())
    }

    #[test]
    fn test_ini_file_points_at_old_format() -> anyhow::Result<()> {
        let temp = assert_fs::TempDir::new()?;
        let config_file = temp.child(".ob_config");
        config_file.write_str("[t1.38]\nrepo = owner/repo\nissue_number = 63683\n\n")?;

        let err = Store::open(config_file.path()).unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
        assert!(err.to_string().contains("older INI-based ob"));
        Ok(())
    }
}
