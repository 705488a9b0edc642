use anyhow::{anyhow, Result};
use log::debug;
use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::checker::DOCKER_BIN;

struct Volume {
    host: PathBuf,
    container: String,
}

/// `docker run` for one-shot tool containers.
pub struct DockerCommand {
    bin: String,
    uid: u32,
    gid: u32,
    user: String,
    docker_image: String,
    mapping_volumes: Vec<Volume>,
    workdir: Option<String>,
    inherited_env: Vec<&'static str>,
}

impl DockerCommand {
    pub fn new(docker_image: String) -> Self {
        let user = users::get_current_username()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        DockerCommand {
            bin: DOCKER_BIN.to_string(),
            uid: users::get_current_uid(),
            gid: users::get_current_gid(),
            user,
            docker_image,
            mapping_volumes: Vec::new(),
            workdir: None,
            inherited_env: vec!["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"],
        }
    }

    pub fn workdir(mut self, dir: String) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn map_volume(mut self, host: &Path, container: String) -> Self {
        self.mapping_volumes.push(Volume {
            host: host.to_path_buf(),
            container,
        });
        self
    }

    /// Run `args` in a fresh container and wait for it to exit.
    pub fn run(self, args: &[String]) -> Result<()> {
        let mut cmd = self.build(args);
        debug!("Run command in docker: {:?}", cmd);
        let status = cmd.spawn()?.wait()?;
        if !status.success() {
            return Err(anyhow!(
                "docker container exit with code {:?}",
                status.code()
            ));
        }
        Ok(())
    }

    fn build(self, args: &[String]) -> Command {
        let DockerCommand {
            bin,
            uid,
            gid,
            user,
            docker_image,
            mapping_volumes,
            workdir,
            inherited_env,
        } = self;

        let mut cmd = Command::new(bin);
        cmd.args([
            "run".to_string(),
            "--rm".to_string(),
            format!("-eUID={}", uid),
            format!("-eGID={}", gid),
            format!("-eUSER={}", user),
            format!("--user={}:{}", uid, gid),
        ]);
        for volume in mapping_volumes {
            cmd.arg(format!(
                "-v{}:{}",
                volume.host.to_string_lossy(),
                volume.container
            ));
        }
        if let Some(workdir) = workdir {
            cmd.arg(format!("-w{}", workdir));
        }

        // inject env
        for key in inherited_env {
            if let Ok(value) = env::var(key) {
                debug!("inherited env {}={}", key, value);
                cmd.arg(format!("-e{}={}", key, value));
            }
        }

        cmd.arg(docker_image).args(args);
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command() {
        let cmd = DockerCommand::new("nervos/ckb-debugger:latest".to_string())
            .map_volume(Path::new("/tmp/txs"), "/tx".to_string())
            .workdir("/tx".to_string())
            .build(&["ckb-debugger".to_string(), "--version".to_string()]);
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "run");
        assert!(args.contains(&"-v/tmp/txs:/tx".to_string()));
        assert!(args.contains(&"-w/tx".to_string()));
        let image = args
            .iter()
            .position(|arg| arg == "nervos/ckb-debugger:latest")
            .unwrap();
        assert_eq!(&args[image + 1..], ["ckb-debugger", "--version"]);
    }
}
