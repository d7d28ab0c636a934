use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};

/// name of the git directory inside a working tree
pub const DOT_GIT: &str = ".git";

/// branch HEAD points at in a freshly initialized repository
pub const DEFAULT_BRANCH: &str = "refs/heads/main";

/// a git repository, with or without a working tree
pub struct Repo {
    gitdir: PathBuf,
    workdir: Option<PathBuf>,
    config: Config,
    ignore_case: bool,
}

impl Repo {
    /// initialize a repository with a working tree at `path`
    pub fn init(path: &Path) -> Result<Self> {
        let gitdir = path.join(DOT_GIT);
        if gitdir.exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }
        create_layout(&gitdir, Config::new(false))?;
        Self::open(path)
    }

    /// initialize a bare repository at `path`
    pub fn init_bare(path: &Path) -> Result<Self> {
        if path.join("HEAD").exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }
        create_layout(path, Config::new(true))?;
        Self::open(path)
    }

    /// open an existing repository, either a working tree or a bare git dir
    pub fn open(path: &Path) -> Result<Self> {
        let (gitdir, workdir) = if path.join(DOT_GIT).is_dir() {
            (path.join(DOT_GIT), Some(path.to_path_buf()))
        } else if path.join("HEAD").is_file() && path.join("objects").is_dir() {
            (path.to_path_buf(), None)
        } else {
            return Err(Error::NoRepo(path.to_path_buf()));
        };

        let config_path = gitdir.join("twig.toml");
        let mut config = if config_path.exists() {
            Config::load(&config_path)?
        } else {
            Config::new(workdir.is_none())
        };
        if workdir.is_none() {
            config.core.bare = true;
        }

        std::fs::create_dir_all(gitdir.join("tmp")).with_path(&gitdir)?;

        let ignore_case = match config.core.ignore_case {
            Some(v) => v,
            None => probe_ignore_case(&gitdir.join("tmp"))?,
        };

        tracing::debug!(gitdir = %gitdir.display(), bare = workdir.is_none(), ignore_case, "opened repository");

        Ok(Self {
            gitdir,
            workdir,
            config,
            ignore_case,
        })
    }

    /// path to the git directory
    pub fn path(&self) -> &Path {
        &self.gitdir
    }

    /// working tree root, `None` for bare repositories
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    /// working tree root or `BareRepo`
    pub fn require_workdir(&self) -> Result<&Path> {
        self.workdir().ok_or(Error::BareRepo)
    }

    pub fn is_bare(&self) -> bool {
        self.workdir.is_none()
    }

    /// filesystem-native path case sensitivity
    pub fn ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// override the probed case sensitivity and record it in the config
    pub fn set_ignore_case(&mut self, ignore_case: bool) {
        self.ignore_case = ignore_case;
        self.config.core.ignore_case = Some(ignore_case);
    }

    /// repository configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// save configuration changes
    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    pub fn config_path(&self) -> PathBuf {
        self.gitdir.join("twig.toml")
    }

    pub fn objects_path(&self) -> PathBuf {
        self.gitdir.join("objects")
    }

    pub fn refs_path(&self) -> PathBuf {
        self.gitdir.join("refs")
    }

    pub fn head_path(&self) -> PathBuf {
        self.gitdir.join("HEAD")
    }

    pub fn packed_refs_path(&self) -> PathBuf {
        self.gitdir.join("packed-refs")
    }

    /// staging snapshot written by this engine
    pub fn index_path(&self) -> PathBuf {
        self.gitdir.join("twig-index")
    }

    pub fn info_exclude_path(&self) -> PathBuf {
        self.gitdir.join("info").join("exclude")
    }

    /// path to tmp directory (for atomic writes)
    pub fn tmp_path(&self) -> PathBuf {
        self.gitdir.join("tmp")
    }

    /// path to lock file
    pub fn lock_path(&self) -> PathBuf {
        self.gitdir.join("twig.lock")
    }

    /// acquire exclusive lock on repository
    /// returns a guard that releases the lock on drop
    pub fn lock(&self) -> Result<RepoLock> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;

        Ok(RepoLock { _flock: flock })
    }

    /// try to acquire exclusive lock, returning None if already locked
    pub fn try_lock(&self) -> Result<Option<RepoLock>> {
        let lock_path = self.lock_path();
        let file = File::create(&lock_path).with_path(&lock_path)?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => Ok(Some(RepoLock { _flock: flock })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err(_) => Err(Error::LockContention),
        }
    }
}

/// guard that holds repository lock until dropped
pub struct RepoLock {
    _flock: Flock<File>,
}

fn create_layout(gitdir: &Path, config: Config) -> Result<()> {
    for sub in ["objects/info", "objects/pack", "refs/heads", "refs/tags", "info", "tmp"] {
        let dir = gitdir.join(sub);
        std::fs::create_dir_all(&dir).with_path(&dir)?;
    }

    let head = gitdir.join("HEAD");
    std::fs::write(&head, format!("ref: {}\n", DEFAULT_BRANCH)).with_path(&head)?;

    config.save(&gitdir.join("twig.toml"))
}

/// create a mixed-case file and see whether its lowercase name resolves
fn probe_ignore_case(tmp: &Path) -> Result<bool> {
    let name = format!("CaseProbe-{}", uuid::Uuid::new_v4().simple());
    let probe = tmp.join(&name);
    File::create(&probe).with_path(&probe)?;
    let folded = tmp.join(name.to_lowercase()).exists();
    std::fs::remove_file(&probe).with_path(&probe)?;
    Ok(folded)
}
