//! Server classpath bootstrap.
//!
//! The server jar and its dependencies are resolved by a throwaway sbt
//! project under `<install_dir>/<scala-version>/`, whose `saveClasspath` task
//! writes the resolved classpath to a file next to it.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use globset::Glob;
use tokio::process::Command;

pub const CLASSPATH_FILE: &str = "classpath";
const INSTALL_LOG_FILE: &str = "install.log";
const SBT_ARGS: [&str; 3] = ["-Dsbt.log.noformat=true", "-batch", "saveClasspath"];
const COURSIER_PLUGIN: &str = r#"addSbtPlugin("io.get-coursier" % "sbt-coursier" % "1.0.0-M11")"#;

#[cfg(windows)]
const CLASSPATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const CLASSPATH_SEPARATOR: &str = ":";

const BUILD_SBT_TEMPLATE: &str = r#"
import sbt._
import IO._
import java.io._
scalaVersion := "{scala_version}"
ivyScala := ivyScala.value map { _.copy(overrideScalaVersion = true) }

// Allows local builds of scala
resolvers += Resolver.mavenLocal
resolvers += Resolver.sonatypeRepo("snapshots")
resolvers += "Typesafe repository" at "http://repo.typesafe.com/typesafe/releases/"
resolvers += "Akka Repo" at "http://repo.akka.io/repository"

// For java support
resolvers += "NetBeans" at "http://bits.netbeans.org/nexus/content/groups/netbeans"

libraryDependencies ++= Seq(
  "org.ensime" %% "ensime" % "{ensime_version}",
  "org.scala-lang" % "scala-compiler" % scalaVersion.value force(),
  "org.scala-lang" % "scala-reflect" % scalaVersion.value force(),
  "org.scala-lang" % "scalap" % scalaVersion.value force()
)

val saveClasspathTask = TaskKey[Unit]("saveClasspath", "Save the classpath to a file")

saveClasspathTask := {
  val managed = (managedClasspath in Runtime).value.map(_.data.getAbsolutePath)
  val unmanaged = (unmanagedClasspath in Runtime).value.map(_.data.getAbsolutePath)
  val out = file("{classpath_file}")
  write(out, (unmanaged ++ managed).mkString(File.pathSeparator))
}
"#;

/// Where and how one Scala version's server classpath is bootstrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    install_dir: PathBuf,
    scala_version: String,
    ensime_version: String,
    sbt_version: String,
}

impl InstallLayout {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        scala_version: impl Into<String>,
        ensime_version: impl Into<String>,
        sbt_version: impl Into<String>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            scala_version: scala_version.into(),
            ensime_version: ensime_version.into(),
            sbt_version: sbt_version.into(),
        }
    }

    #[must_use]
    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    #[must_use]
    pub fn project_dir(&self) -> PathBuf {
        self.install_dir.join(&self.scala_version)
    }

    #[must_use]
    pub fn classpath_file(&self) -> PathBuf {
        self.project_dir().join(CLASSPATH_FILE)
    }

    #[must_use]
    pub fn install_log(&self) -> PathBuf {
        self.project_dir().join(INSTALL_LOG_FILE)
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.classpath_file().is_file()
    }

    #[must_use]
    pub fn build_sbt(&self) -> String {
        BUILD_SBT_TEMPLATE
            .replace("{scala_version}", &self.scala_version)
            .replace("{ensime_version}", &self.ensime_version)
            .replace("{classpath_file}", &self.classpath_file().to_string_lossy())
    }

    /// Write `build.sbt` and the `project/` settings.
    pub fn write_bootstrap_project(&self) -> Result<()> {
        let project_dir = self.project_dir();
        let meta_dir = project_dir.join("project");
        fs::create_dir_all(&meta_dir)
            .with_context(|| format!("creating {}", meta_dir.display()))?;

        let files = [
            (project_dir.join("build.sbt"), self.build_sbt()),
            (
                meta_dir.join("build.properties"),
                format!("sbt.version={}\n", self.sbt_version),
            ),
            (meta_dir.join("plugins.sbt"), format!("{COURSIER_PLUGIN}\n")),
        ];
        for (path, contents) in files {
            fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        }
        Ok(())
    }

    /// Resolve the classpath with sbt and wait for it to finish.
    pub async fn generate_classpath(&self) -> Result<()> {
        self.write_bootstrap_project()?;

        let sbt = which::which("sbt").context("sbt not found on PATH")?;
        let project_dir = self.project_dir();
        let log_path = self.install_log();
        let log = File::create(&log_path)
            .with_context(|| format!("creating {}", log_path.display()))?;
        let log_err = log.try_clone().context("duplicating install log handle")?;

        tracing::info!(
            scala_version = %self.scala_version,
            dir = %project_dir.display(),
            "Resolving server classpath"
        );
        let status = Command::new(&sbt)
            .args(SBT_ARGS)
            .current_dir(&project_dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err)
            .status()
            .await
            .with_context(|| format!("running {}", sbt.display()))?;

        if !status.success() {
            bail!("sbt exited with {status}; see {}", log_path.display());
        }
        if !self.is_installed() {
            bail!("sbt did not write {}", self.classpath_file().display());
        }

        if let Err(e) = self.reorder_classpath_file() {
            tracing::warn!("Classpath ordering failed: {e:#}");
        }
        Ok(())
    }

    fn reorder_classpath_file(&self) -> Result<()> {
        let path = self.classpath_file();
        let classpath = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let classpath = classpath.lines().next().unwrap_or_default();
        if classpath.is_empty() {
            return Ok(());
        }
        fs::write(&path, reorder_classpath(classpath))
            .with_context(|| format!("writing {}", path.display()))
    }

    /// The launch classpath: the resolved entries plus the JDK's `tools.jar`,
    /// preceded by any local development assembly for `scala_minor`.
    pub fn load_classpath(&self, java_home: &Path, scala_minor: &str) -> Result<String> {
        let path = self.classpath_file();
        let resolved = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let tools_jar = java_home.join("lib").join("tools.jar");

        let mut entries: Vec<String> = self
            .assembly_jars(scala_minor)
            .into_iter()
            .map(|jar| jar.to_string_lossy().into_owned())
            .collect();
        entries.push(resolved.trim().to_string());
        entries.push(tools_jar.to_string_lossy().into_owned());
        Ok(entries.join(CLASSPATH_SEPARATOR))
    }

    /// `ensime_<scala-minor>*-assembly.jar` files in the install dir.
    fn assembly_jars(&self, scala_minor: &str) -> Vec<PathBuf> {
        let pattern = format!("ensime_{scala_minor}*-assembly.jar");
        let matcher = match Glob::new(&pattern) {
            Ok(glob) => glob.compile_matcher(),
            Err(e) => {
                tracing::warn!("Invalid assembly jar pattern {pattern:?}: {e}");
                return Vec::new();
            }
        };
        let Ok(entries) = fs::read_dir(&self.install_dir) else {
            return Vec::new();
        };

        let mut jars: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .filter(|entry| matcher.is_match(entry.file_name()))
            .map(|entry| entry.path())
            .collect();
        jars.sort();
        if !jars.is_empty() {
            tracing::info!(count = jars.len(), "Using local development server assembly");
        }
        jars
    }
}

/// Move entries containing `monkeys` to the front, keeping relative order.
#[must_use]
pub fn reorder_classpath(classpath: &str) -> String {
    let (monkeys, rest): (Vec<&str>, Vec<&str>) = classpath
        .split(CLASSPATH_SEPARATOR)
        .partition(|entry| entry.contains("monkeys"));
    monkeys
        .into_iter()
        .chain(rest)
        .collect::<Vec<_>>()
        .join(CLASSPATH_SEPARATOR)
}
