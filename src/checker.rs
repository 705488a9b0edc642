use anyhow::{anyhow, bail, Error, Result};
use log::warn;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::str::FromStr;

pub const CKB_DEBUGGER_BIN: &str = "ckb-debugger";
pub const DOCKER_BIN: &str = "docker";

struct BinDep {
    program: String,
    installed: bool,
    version: Option<Version>,
    required_version: Option<Version>,
}

impl BinDep {
    fn build(
        program: &str,
        arg: &'static str,
        version_prefix: Option<&'static str>,
        required_version: Option<Version>,
    ) -> Self {
        let output = Command::new(program).arg(arg).output();
        let (installed, stdout) = match output {
            Ok(output) => (output.status.success(), output.stdout),
            Err(_) => (false, Vec::new()),
        };
        let version = version_prefix
            .filter(|_| installed)
            .and_then(|prefix| Version::parse_with_prefix(prefix, stdout).ok());
        BinDep {
            program: program.to_string(),
            installed,
            version,
            required_version,
        }
    }

    /// Check if the required version is met, return true if no required version
    fn meet_required_version(&self) -> bool {
        self.required_version
            .as_ref()
            .map(|required_version| {
                self.version
                    .as_ref()
                    .map(|version| version >= required_version)
                    .unwrap_or(false)
            })
            .unwrap_or(true)
    }

    fn ready(&self) -> bool {
        self.installed && self.meet_required_version()
    }
}

/// Local tools the commands shell out to.
pub struct Checker {
    ckb: BinDep,
    ckb_debugger: BinDep,
    docker: BinDep,
}

impl Checker {
    pub fn build(ckb_bin: &Path, min_debugger_version: Version) -> Self {
        let ckb = BinDep::build(&ckb_bin.to_string_lossy(), "--version", Some("ckb"), None);
        Checker {
            ckb,
            ckb_debugger: Self::debugger(min_debugger_version),
            docker: Self::docker(),
        }
    }

    fn debugger(min_version: Version) -> BinDep {
        BinDep::build(
            CKB_DEBUGGER_BIN,
            "--version",
            Some(CKB_DEBUGGER_BIN),
            Some(min_version),
        )
    }

    fn docker() -> BinDep {
        BinDep::build(DOCKER_BIN, "version", None, None)
    }

    /// Whether a native `ckb-debugger` of at least `min_version` is on `PATH`.
    pub fn native_debugger_ready(min_version: Version) -> bool {
        Self::debugger(min_version).ready()
    }

    pub fn docker_installed() -> bool {
        Self::docker().installed
    }

    pub fn check_ckb(&self) -> Result<()> {
        if !self.ckb.installed {
            bail!(
                "Can't find {}, install ckb or set bins.default_ckb_version in settings",
                self.ckb.program
            );
        }
        Ok(())
    }

    pub fn print_report(&self) {
        println!("------------------------------");
        match (&self.ckb.installed, &self.ckb.version) {
            (true, Some(version)) => println!("{:14} installed {}", "ckb", version),
            (true, None) => println!("{:14} installed (unknown version)", "ckb"),
            (false, _) => warn!(
                "{:14} not found ({}) - node and devnet system scripts are disabled",
                "ckb", self.ckb.program
            ),
        }

        let debugger = &self.ckb_debugger;
        let required = debugger
            .required_version
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        if debugger.ready() {
            if let Some(version) = &debugger.version {
                println!(
                    "{:14} installed {} (required {})",
                    debugger.program, version, required
                );
            }
        } else if debugger.installed {
            warn!(
                "{:14} installed {} (required {}) - docker will be used for debugging",
                debugger.program,
                debugger
                    .version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "(unknown version)".to_string()),
                required
            );
        } else {
            warn!(
                "{:14} not found - docker will be used for debugging",
                debugger.program
            );
        }

        if self.docker.installed {
            println!("{:14} installed", self.docker.program);
        } else {
            println!("{:14} not found - Please install docker", self.docker.program);
        }
        println!("------------------------------");
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version(pub usize, pub usize, pub usize);

impl Version {
    fn parse_with_prefix(prefix: &'static str, buf: Vec<u8>) -> Result<Self> {
        let s = String::from_utf8(buf)?;
        let vers = s.trim().trim_start_matches(prefix);
        let vers = vers
            .split_whitespace()
            .next()
            .ok_or(anyhow!("no version found"))?;
        vers.parse()
    }
}

impl FromStr for Version {
    type Err = Error;

    /// `x.y.z`, a pre-release suffix on the patch number is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let mut vers_numbers = s.trim().trim_start_matches('v').split('.');
        let major: usize = vers_numbers
            .next()
            .ok_or(anyhow!("miss major version"))?
            .parse()?;
        let minor: usize = vers_numbers
            .next()
            .ok_or(anyhow!("miss minor version"))?
            .parse()?;
        let patch = vers_numbers.next().ok_or(anyhow!("miss patch version"))?;
        let patch: usize = patch
            .split(|c: char| !c.is_ascii_digit())
            .next()
            .unwrap_or_default()
            .parse()?;
        if vers_numbers.next().is_some() {
            return Err(anyhow!("parse version error"));
        }
        Ok(Version(major, minor, patch))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.0, self.1, self.2)
    }
}
