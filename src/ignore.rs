//! gitignore evaluation: `.gitignore` in every directory plus
//! `<gitdir>/info/exclude`

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use crate::error::{Error, Result};
use crate::repo::{Repo, DOT_GIT};

const IGNORE_FILE: &str = ".gitignore";

#[derive(Clone, Debug)]
struct Rule {
    pattern: Pattern,
    negated: bool,
    dir_only: bool,
    /// matched against the path relative to the rule's directory, not the basename
    anchored: bool,
}

impl Rule {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line.strip_prefix('\\').unwrap_or(line)),
        };
        let (dir_only, rest) = match rest.strip_suffix('/') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let anchored = rest.contains('/');
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        if rest.is_empty() {
            return None;
        }

        match Pattern::new(rest) {
            Ok(pattern) => Some(Self {
                pattern,
                negated,
                dir_only,
                anchored,
            }),
            Err(e) => {
                tracing::warn!(pattern = rest, error = %e, "skipping invalid ignore pattern");
                None
            }
        }
    }

    fn matches(&self, rel_path: &str, is_dir: bool, options: MatchOptions) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        if self.anchored {
            self.pattern.matches_with(rel_path, options)
        } else {
            let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
            self.pattern.matches_with(basename, options)
        }
    }
}

/// lazily loaded ignore rules for one working tree
#[derive(Debug)]
pub struct IgnoreRules {
    workdir: PathBuf,
    exclude: Vec<Rule>,
    /// directory ("" for the root) -> rules from its `.gitignore`
    per_dir: HashMap<String, Vec<Rule>>,
    /// memoized verdicts for directories
    dir_verdicts: HashMap<String, bool>,
    options: MatchOptions,
}

impl IgnoreRules {
    pub fn new(repo: &Repo) -> Result<Self> {
        let workdir = repo.require_workdir()?.to_path_buf();
        let exclude = read_rules(&repo.info_exclude_path())?;
        Ok(Self {
            workdir,
            exclude,
            per_dir: HashMap::new(),
            dir_verdicts: HashMap::new(),
            options: MatchOptions {
                case_sensitive: !repo.ignore_case(),
                require_literal_separator: true,
                require_literal_leading_dot: false,
            },
        })
    }

    /// is the repository-relative `path` ignored
    ///
    /// anything inside an ignored directory is ignored, whatever later
    /// negations say.
    pub fn is_ignored(&mut self, path: &str, is_dir: bool) -> Result<bool> {
        if path.split('/').any(|c| c == DOT_GIT) {
            return Ok(true);
        }

        let mut end = 0;
        while let Some(i) = path[end..].find('/') {
            let dir = &path[..end + i];
            if self.dir_ignored(dir)? {
                return Ok(true);
            }
            end += i + 1;
        }

        if is_dir {
            self.dir_ignored(path)
        } else {
            self.evaluate(path, false)
        }
    }

    fn dir_ignored(&mut self, dir: &str) -> Result<bool> {
        if let Some(&verdict) = self.dir_verdicts.get(dir) {
            return Ok(verdict);
        }
        let verdict = self.evaluate(dir, true)?;
        self.dir_verdicts.insert(dir.to_string(), verdict);
        Ok(verdict)
    }

    /// last matching rule wins; deeper `.gitignore` files override shallower
    /// ones, and every `.gitignore` overrides `info/exclude`
    fn evaluate(&mut self, path: &str, is_dir: bool) -> Result<bool> {
        let mut ignored = false;
        for rule in &self.exclude {
            if rule.matches(path, is_dir, self.options) {
                ignored = !rule.negated;
            }
        }

        let mut dirs = vec![""];
        dirs.extend(path.match_indices('/').map(|(i, _)| &path[..i]));
        for dir in dirs {
            self.load_dir(dir)?;
            let rel = if dir.is_empty() {
                path
            } else {
                &path[dir.len() + 1..]
            };
            for rule in self.per_dir.get(dir).into_iter().flatten() {
                if rule.matches(rel, is_dir, self.options) {
                    ignored = !rule.negated;
                }
            }
        }
        Ok(ignored)
    }

    fn load_dir(&mut self, dir: &str) -> Result<()> {
        if !self.per_dir.contains_key(dir) {
            let file = self.workdir.join(dir).join(IGNORE_FILE);
            let rules = read_rules(&file)?;
            self.per_dir.insert(dir.to_string(), rules);
        }
        Ok(())
    }
}

fn read_rules(path: &Path) -> Result<Vec<Rule>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter_map(Rule::parse).collect()),
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(Vec::new())
        }
        Err(e) => Err(Error::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(files: &[(&str, &str)]) -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let work = dir.path().join("work");
        let repo = Repo::init(&work).unwrap();
        for (path, content) in files {
            let full = work.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        (dir, repo)
    }

    #[test]
    fn test_basename_and_negation() {
        let (_dir, repo) = setup(&[(".gitignore", "*.log\n!keep.log\n# comment\n\n")]);
        let mut rules = IgnoreRules::new(&repo).unwrap();
        assert!(rules.is_ignored("debug.log", false).unwrap());
        assert!(rules.is_ignored("sub/dir/error.log", false).unwrap());
        assert!(!rules.is_ignored("keep.log", false).unwrap());
        assert!(!rules.is_ignored("main.rs", false).unwrap());
    }

    #[test]
    fn test_dir_only_and_anchored() {
        let (_dir, repo) = setup(&[(".gitignore", "build/\n/root-only.txt\ndocs/*.tmp\n")]);
        let mut rules = IgnoreRules::new(&repo).unwrap();
        assert!(rules.is_ignored("build", true).unwrap());
        assert!(!rules.is_ignored("build", false).unwrap());
        assert!(rules.is_ignored("build/out.o", false).unwrap());
        assert!(rules.is_ignored("root-only.txt", false).unwrap());
        assert!(!rules.is_ignored("sub/root-only.txt", false).unwrap());
        assert!(rules.is_ignored("docs/a.tmp", false).unwrap());
        assert!(!rules.is_ignored("docs/deep/a.tmp", false).unwrap());
    }

    #[test]
    fn test_nested_gitignore_overrides() {
        let (_dir, repo) = setup(&[
            (".gitignore", "*.dat\n"),
            ("data/.gitignore", "!important.dat\nlocal.txt\n"),
        ]);
        let mut rules = IgnoreRules::new(&repo).unwrap();
        assert!(rules.is_ignored("x.dat", false).unwrap());
        assert!(!rules.is_ignored("data/important.dat", false).unwrap());
        assert!(rules.is_ignored("data/local.txt", false).unwrap());
        assert!(!rules.is_ignored("local.txt", false).unwrap());
    }

    #[test]
    fn test_cannot_reinclude_inside_ignored_dir() {
        let (_dir, repo) = setup(&[(".gitignore", "vendor/\n!vendor/keep.rs\n")]);
        let mut rules = IgnoreRules::new(&repo).unwrap();
        assert!(rules.is_ignored("vendor/keep.rs", false).unwrap());
    }

    #[test]
    fn test_info_exclude_and_dot_git() {
        let (dir, repo) = setup(&[]);
        fs::write(dir.path().join("work/.git/info/exclude"), "secret\n").unwrap();
        let mut rules = IgnoreRules::new(&repo).unwrap();
        assert!(rules.is_ignored("secret", false).unwrap());
        assert!(rules.is_ignored(".git", true).unwrap());
        assert!(rules.is_ignored("sub/.git", true).unwrap());
    }
}
