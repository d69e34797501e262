use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn register(
        &self,
        label: &str,
        attributes_json: &str,
        image_paths: Vec<String>,
    ) -> zbus::Result<String>;
    async fn enroll(&self, identity_id: &str, image_paths: Vec<String>) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn attendance(&self) -> zbus::Result<String>;
    async fn current_frame(&self) -> zbus::Result<String>;
    async fn reload(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<bool>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new identity from reference photos
    Register {
        /// Display label (must be unique)
        label: String,
        /// Extra attribute, repeatable (e.g. --attr course=BSCS)
        #[arg(short, long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
        /// Reference image files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Add reference photos to an existing identity
    Enroll {
        /// Identity ID (see `rollcall list`)
        id: String,
        /// Reference image files
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List registered identities
    List,
    /// Show who has been seen and when
    Attendance,
    /// Show the labels on the most recent frame
    Frame,
    /// Reload identities from the database
    Reload,
    /// Show daemon status
    Status,
    /// Stop the live loop and shut the daemon down
    Stop,
}

fn parse_attr(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {s:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty attribute name in {s:?}"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// The daemon resolves paths against its own working directory.
fn absolute_paths(images: &[PathBuf]) -> Result<Vec<String>> {
    images
        .iter()
        .map(|p| {
            let abs = std::fs::canonicalize(p)
                .with_context(|| format!("cannot access {}", p.display()))?;
            Ok(abs.to_string_lossy().into_owned())
        })
        .collect()
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_report(raw: &str) -> Result<()> {
    let report: serde_json::Value = serde_json::from_str(raw).context("daemon returned invalid JSON")?;
    println!(
        "{} ({}): {} descriptor(s) added",
        report["label"].as_str().unwrap_or_default(),
        report["identity_id"].as_str().unwrap_or_default(),
        report["descriptors_added"]
    );
    for failure in report["failed"].as_array().into_iter().flatten() {
        println!(
            "  skipped {}: {}",
            failure["image"].as_str().unwrap_or_default(),
            failure["reason"].as_str().unwrap_or_default()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("cannot connect to the session bus")?;
    let proxy = RollcallProxy::new(&conn).await?;

    match cli.command {
        Commands::Register {
            label,
            attrs,
            images,
        } => {
            let attributes: BTreeMap<String, String> = attrs.into_iter().collect();
            let attributes_json = serde_json::to_string(&attributes)?;
            let paths = absolute_paths(&images)?;
            tracing::debug!(%label, images = paths.len(), "registering");
            let raw = proxy
                .register(&label, &attributes_json, paths)
                .await
                .context("registration failed")?;
            print_report(&raw)?;
        }
        Commands::Enroll { id, images } => {
            let paths = absolute_paths(&images)?;
            let raw = proxy
                .enroll(&id, paths)
                .await
                .context("enrollment failed")?;
            print_report(&raw)?;
        }
        Commands::List => {
            let raw = proxy.list_identities().await?;
            let identities: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            if identities.is_empty() {
                println!("No identities registered");
            }
            for identity in &identities {
                println!(
                    "{}  {}  ({} descriptor(s), registered {})",
                    identity["id"].as_str().unwrap_or_default(),
                    identity["label"].as_str().unwrap_or_default(),
                    identity["descriptors"],
                    identity["created_at"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Attendance => {
            let raw = proxy.attendance().await?;
            let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            if entries.is_empty() {
                println!("Nobody seen yet");
            }
            for entry in &entries {
                println!(
                    "{} {}",
                    entry["label"].as_str().unwrap_or_default(),
                    entry["first_seen"].as_str().unwrap_or_default()
                );
            }
        }
        Commands::Frame => print_json(&proxy.current_frame().await?)?,
        Commands::Reload => {
            let count = proxy.reload().await?;
            println!("{count} identities loaded");
        }
        Commands::Status => print_json(&proxy.status().await?)?,
        Commands::Stop => {
            if !proxy.stop().await? {
                bail!("daemon is already stopping");
            }
            println!("stop requested");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attr() {
        assert_eq!(
            parse_attr("course=BSCS").unwrap(),
            ("course".to_string(), "BSCS".to_string())
        );
        assert_eq!(
            parse_attr(" department = Computer Science ").unwrap(),
            ("department".to_string(), "Computer Science".to_string())
        );
        assert_eq!(parse_attr("note=a=b").unwrap().1, "a=b");
        assert!(parse_attr("course").is_err());
        assert!(parse_attr("=x").is_err());
    }

    #[test]
    fn test_register_args() {
        let cli = Cli::try_parse_from([
            "rollcall", "register", "Alice", "--attr", "age=20", "-a", "sex=F", "a.jpg", "b.jpg",
        ])
        .unwrap();
        match cli.command {
            Commands::Register { label, attrs, images } => {
                assert_eq!(label, "Alice");
                assert_eq!(attrs.len(), 2);
                assert_eq!(images, vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
            }
            _ => panic!("expected register"),
        }
    }

    #[test]
    fn test_register_requires_images() {
        assert!(Cli::try_parse_from(["rollcall", "register", "Alice"]).is_err());
    }

    #[test]
    fn test_absolute_paths_reports_missing_file() {
        let err = absolute_paths(&[PathBuf::from("/definitely/missing.jpg")]).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing.jpg"));
    }
}
