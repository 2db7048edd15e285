use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.freedesktop.Attend1",
    default_service = "org.freedesktop.Attend1",
    default_path = "/org/freedesktop/Attend1"
)]
trait Attend {
    fn check_in(&self, employee_id: &str, encoding: &[f64], evidence: &[u8])
        -> zbus::Result<String>;
    fn check_out(&self, employee_id: &str, encoding: &[f64], evidence: &[u8])
        -> zbus::Result<String>;
    fn day(&self, employee_id: &str, date: &str) -> zbus::Result<String>;
    fn report(&self, from: &str, to: &str, department: &str) -> zbus::Result<String>;
    fn attendance(&self, date: &str) -> zbus::Result<String>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "attend", about = "Attend biometric attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus (development)
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check an employee in
    CheckIn(Mark),
    /// Check an employee out
    CheckOut(Mark),
    /// Show one employee's transactions and failed attempts for a day
    Day {
        #[arg(short, long)]
        employee: String,
        /// Date as YYYY-MM-DD (defaults to today in the daemon's timezone)
        #[arg(short, long)]
        date: Option<chrono::NaiveDate>,
    },
    /// List transactions between two dates, inclusive
    Report {
        from: chrono::NaiveDate,
        to: chrono::NaiveDate,
        /// Only employees of this department
        #[arg(long)]
        department: Option<String>,
    },
    /// Show the attendance rate and per-department presence for a day
    Attendance {
        /// Date as YYYY-MM-DD (defaults to today in the daemon's timezone)
        #[arg(short, long)]
        date: Option<chrono::NaiveDate>,
    },
    /// Show daemon status
    Status,
}

#[derive(clap::Args)]
struct Mark {
    #[arg(short, long)]
    employee: String,
    /// JSON file holding the probe encoding as an array of numbers
    #[arg(long)]
    encoding: PathBuf,
    /// Image file to keep as evidence
    #[arg(long)]
    evidence: Option<PathBuf>,
}

impl Mark {
    fn load(&self) -> Result<(Vec<f64>, Vec<u8>)> {
        let encoding = read_encoding(&self.encoding)?;
        let evidence = match &self.evidence {
            Some(path) => {
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
            }
            None => Vec::new(),
        };
        Ok((encoding, evidence))
    }
}

fn read_encoding(path: &Path) -> Result<Vec<f64>> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let values: Vec<f64> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of numbers", path.display()))?;
    if values.is_empty() {
        bail!("{} holds an empty encoding", path.display());
    }
    Ok(values)
}

/// Pretty-print a JSON reply. Daemon refusals carry a `{code, message}` body.
fn print_reply(reply: zbus::Result<String>) -> Result<()> {
    match reply {
        Ok(json) => {
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(zbus::Error::MethodError(_, Some(body), _)) => {
            match serde_json::from_str::<serde_json::Value>(&body) {
                Ok(v) => bail!(
                    "{} ({})",
                    v["message"].as_str().unwrap_or(&body),
                    v["code"].as_str().unwrap_or("unknown")
                ),
                Err(_) => bail!("{body}"),
            }
        }
        Err(e) => Err(e).context("calling attendd"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = if cli.session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendProxy::new(&conn).await?;

    match cli.command {
        Commands::CheckIn(mark) => {
            let (encoding, evidence) = mark.load()?;
            tracing::debug!(employee = %mark.employee, dimension = encoding.len(), "check-in");
            print_reply(proxy.check_in(&mark.employee, &encoding, &evidence).await)
        }
        Commands::CheckOut(mark) => {
            let (encoding, evidence) = mark.load()?;
            tracing::debug!(employee = %mark.employee, dimension = encoding.len(), "check-out");
            print_reply(proxy.check_out(&mark.employee, &encoding, &evidence).await)
        }
        Commands::Day { employee, date } => {
            let date = date.map(|d| d.to_string()).unwrap_or_default();
            print_reply(proxy.day(&employee, &date).await)
        }
        Commands::Report {
            from,
            to,
            department,
        } => {
            let department = department.unwrap_or_default();
            print_reply(
                proxy
                    .report(&from.to_string(), &to.to_string(), &department)
                    .await,
            )
        }
        Commands::Attendance { date } => {
            let date = date.map(|d| d.to_string()).unwrap_or_default();
            print_reply(proxy.attendance(&date).await)
        }
        Commands::Status => print_reply(proxy.status().await),
    }
}
