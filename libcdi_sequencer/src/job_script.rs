use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{ConfigError, JobScriptError};

/// Description of a PBS batch job that launches the sequencer on every MPI rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub job_name: String,
    pub nodes: usize,
    pub ranks_per_node: usize,
    pub walltime: String,
    pub system: Option<String>,
    pub queue: Option<String>,
    pub account: Option<String>,
    pub filesystems: Vec<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub modules: Vec<String>,
    pub environment: Vec<(String, String)>,
    pub command: String,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            job_name: String::from("cdi_reconstruction"),
            nodes: 1,
            ranks_per_node: 4,
            walltime: String::from("01:00:00"),
            system: None,
            queue: None,
            account: None,
            filesystems: vec![String::from("home")],
            stdout_path: None,
            stderr_path: None,
            modules: Vec::new(),
            environment: Vec::new(),
            command: String::from("cdi_sequencer_cli run -p config_rec"),
        }
    }
}

fn is_walltime(text: &str) -> bool {
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 3 {
        return false;
    }
    let mut fields = Vec::with_capacity(3);
    for part in parts.iter() {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        match part.parse::<u32>() {
            Ok(v) => fields.push(v),
            Err(_) => return false,
        }
    }
    fields[1] < 60 && fields[2] < 60
}

impl JobConfig {
    pub fn read_config_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn total_ranks(&self) -> usize {
        self.nodes * self.ranks_per_node
    }

    pub fn validate(&self) -> Result<(), JobScriptError> {
        if self.nodes == 0 || self.ranks_per_node == 0 {
            return Err(JobScriptError::NoRanks);
        }
        if !is_walltime(&self.walltime) {
            return Err(JobScriptError::BadWalltime(self.walltime.clone()));
        }
        if self.command.trim().is_empty() {
            return Err(JobScriptError::NoCommand);
        }
        Ok(())
    }

    /// Render the job script text
    pub fn render(&self) -> Result<String, JobScriptError> {
        self.validate()?;
        let mut lines = vec![
            String::from("#!/bin/bash -l"),
            format!("#PBS -N {}", self.job_name),
        ];
        match self.system.as_ref() {
            Some(system) => lines.push(format!("#PBS -l select={}:system={system}", self.nodes)),
            None => lines.push(format!("#PBS -l select={}", self.nodes)),
        }
        lines.push(String::from("#PBS -l place=scatter"));
        lines.push(format!("#PBS -l walltime={}", self.walltime));
        if !self.filesystems.is_empty() {
            lines.push(format!("#PBS -l filesystems={}", self.filesystems.join(":")));
        }
        if let Some(queue) = self.queue.as_ref() {
            lines.push(format!("#PBS -q {queue}"));
        }
        if let Some(account) = self.account.as_ref() {
            lines.push(format!("#PBS -A {account}"));
        }
        if let Some(path) = self.stdout_path.as_ref() {
            lines.push(format!("#PBS -o {}", path.display()));
        }
        if let Some(path) = self.stderr_path.as_ref() {
            lines.push(format!("#PBS -e {}", path.display()));
        }

        lines.push(String::new());
        lines.push(String::from("cd ${PBS_O_WORKDIR}"));
        lines.extend(self.modules.iter().map(|m| format!("module load {m}")));
        lines.extend(
            self.environment
                .iter()
                .map(|(key, value)| format!("export {key}={value}")),
        );

        lines.push(String::new());
        lines.push(format!(
            "mpiexec -n {} --ppn {} {}",
            self.total_ranks(),
            self.ranks_per_node,
            self.command.trim()
        ));

        let mut script = lines.join("\n");
        script.push('\n');
        Ok(script)
    }

    pub fn write_script(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.render()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_render_script() {
        let job = JobConfig {
            nodes: 2,
            ranks_per_node: 4,
            walltime: String::from("00:30:00"),
            system: Some(String::from("polaris")),
            queue: Some(String::from("debug")),
            account: Some(String::from("cdi_project")),
            filesystems: vec![String::from("home"), String::from("eagle")],
            modules: vec![String::from("conda")],
            environment: vec![(String::from("OMP_NUM_THREADS"), String::from("1"))],
            ..Default::default()
        };
        let script = job.render().unwrap();
        assert!(script.starts_with("#!/bin/bash -l\n"));
        assert!(script.contains("#PBS -l select=2:system=polaris\n"));
        assert!(script.contains("#PBS -l walltime=00:30:00\n"));
        assert!(script.contains("#PBS -l filesystems=home:eagle\n"));
        assert!(script.contains("#PBS -q debug\n"));
        assert!(script.contains("#PBS -A cdi_project\n"));
        assert!(!script.contains("#PBS -o"));
        assert!(script.contains("module load conda\n"));
        assert!(script.contains("export OMP_NUM_THREADS=1\n"));
        assert!(script.ends_with("mpiexec -n 8 --ppn 4 cdi_sequencer_cli run -p config_rec\n"));
    }

    #[test]
    fn test_validation() {
        let no_ranks = JobConfig {
            nodes: 0,
            ..Default::default()
        };
        assert_eq!(no_ranks.render(), Err(JobScriptError::NoRanks));
        let bad_time = JobConfig {
            walltime: String::from("1:75:00"),
            ..Default::default()
        };
        assert_eq!(
            bad_time.render(),
            Err(JobScriptError::BadWalltime(String::from("1:75:00")))
        );
        assert!(!is_walltime("01:00"));
        assert!(is_walltime("100:00:00"));
        let no_command = JobConfig {
            command: String::from("  "),
            ..Default::default()
        };
        assert_eq!(no_command.render(), Err(JobScriptError::NoCommand));
    }

    #[test]
    fn test_read_job_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.yaml");
        std::fs::write(
            &path,
            indoc! {"
                nodes: 3
                ranks_per_node: 2
                walltime: '02:00:00'
                account: cdi
            "},
        )
        .unwrap();
        let job = JobConfig::read_config_file(&path).unwrap();
        assert_eq!(job.total_ranks(), 6);
        assert_eq!(job.account.as_deref(), Some("cdi"));
        assert_eq!(job.job_name, "cdi_reconstruction");
    }
}
