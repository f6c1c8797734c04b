//! Mailbox include/exclude/special-folder filtering
//!
//! Precompiles up to three regexes — include, exclude, and a composed
//! special-folders pattern — and applies them to `LIST` results. A mailbox
//! passes iff `include` is absent or matches, and neither `exclude` nor
//! `special` match.

use regex::Regex;

use crate::errors::{AppError, AppResult};

const TRASH_CLASS: &str = r"(?i)^(Trash|Gelöscht.*|Deleted Items|Papierkorb)$";
const JUNK_CLASS: &str = r"(?i)^(Junk|Spam|Bulk Mail|Unerw.*)$";
const DRAFTS_CLASS: &str = r"(?i)^(Drafts|Entwürfe)$";
const SENT_CLASS: &str = r"(?i)^(Sent( Items)?|Gesendet.*)$";

/// Which special-folder classes to treat as excluded
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecialFolders {
    pub skip_trash: bool,
    pub skip_junk: bool,
    pub skip_drafts: bool,
    pub skip_sent: bool,
}

impl SpecialFolders {
    /// Enable every class, matching `--skip-special`
    pub fn all() -> Self {
        Self {
            skip_trash: true,
            skip_junk: true,
            skip_drafts: true,
            skip_sent: true,
        }
    }

    fn classes(self) -> Vec<&'static str> {
        let mut classes = Vec::new();
        if self.skip_trash {
            classes.push(TRASH_CLASS);
        }
        if self.skip_junk {
            classes.push(JUNK_CLASS);
        }
        if self.skip_drafts {
            classes.push(DRAFTS_CLASS);
        }
        if self.skip_sent {
            classes.push(SENT_CLASS);
        }
        classes
    }
}

/// Compiled include/exclude/special predicate over mailbox names
pub struct MailboxFilter {
    include: Option<Regex>,
    exclude: Option<Regex>,
    special: Option<Regex>,
}

impl MailboxFilter {
    /// Compile a filter from optional include/exclude patterns and special-folder flags
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if `include` or `exclude` fail to compile.
    pub fn new(
        include: Option<&str>,
        exclude: Option<&str>,
        special: SpecialFolders,
    ) -> AppResult<Self> {
        let include = include.map(compile).transpose()?;
        let exclude = exclude.map(compile).transpose()?;
        let classes = special.classes();
        let special = if classes.is_empty() {
            None
        } else {
            // Each class is already a fully-anchored alternation; join them with `|`
            // rather than re-anchoring, since every individual class is complete.
            Some(compile(&classes.join("|"))?)
        };
        Ok(Self {
            include,
            exclude,
            special,
        })
    }

    /// Whether `name` passes the filter
    pub fn matches(&self, name: &str) -> bool {
        let include_ok = self.include.as_ref().is_none_or(|re| re.is_match(name));
        let excluded = self.exclude.as_ref().is_some_and(|re| re.is_match(name));
        let special = self.special.as_ref().is_some_and(|re| re.is_match(name));
        include_ok && !excluded && !special
    }

    /// Filter a list of mailbox names, preserving order
    pub fn apply<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        names.into_iter().filter(|n| self.matches(n)).collect()
    }
}

fn compile(pattern: &str) -> AppResult<Regex> {
    Regex::new(pattern).map_err(|e| AppError::invalid(format!("invalid regex {pattern:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::{MailboxFilter, SpecialFolders};

    #[test]
    fn no_filters_passes_everything() {
        let filter = MailboxFilter::new(None, None, SpecialFolders::default()).unwrap();
        assert!(filter.matches("INBOX"));
        assert!(filter.matches("Anything/Goes"));
    }

    #[test]
    fn skip_special_excludes_all_four_classes() {
        let filter = MailboxFilter::new(None, None, SpecialFolders::all()).unwrap();
        for name in ["Trash", "Junk", "Spam", "Drafts", "Sent", "Sent Items", "Papierkorb"] {
            assert!(!filter.matches(name), "{name} should be filtered out");
        }
        assert!(filter.matches("INBOX"));
    }

    #[test]
    fn include_and_skip_special_compose_as_s4() {
        let filter =
            MailboxFilter::new(Some(r"^(INBOX|Archive.*)$"), None, SpecialFolders::all()).unwrap();
        let mailboxes = ["INBOX", "Trash", "Archive/2024", "Spam"];
        let passed = filter.apply(mailboxes);
        assert_eq!(passed, vec!["INBOX", "Archive/2024"]);
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = MailboxFilter::new(Some(".*"), Some("^Drafts$"), SpecialFolders::default())
            .unwrap();
        assert!(!filter.matches("Drafts"));
        assert!(filter.matches("INBOX"));
    }

    #[test]
    fn individual_special_flags_enable_only_their_class() {
        let filter = MailboxFilter::new(
            None,
            None,
            SpecialFolders {
                skip_trash: true,
                ..SpecialFolders::default()
            },
        )
        .unwrap();
        assert!(!filter.matches("Trash"));
        assert!(filter.matches("Junk"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(MailboxFilter::new(Some("("), None, SpecialFolders::default()).is_err());
    }
}
