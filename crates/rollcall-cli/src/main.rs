use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::{Camera, ImageFileSource, StillSource};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall classroom attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an operator session
    Login {
        /// Operator identifier (email or staff id)
        operator: String,
        #[arg(short, long)]
        secret: String,
    },
    /// End the operator session
    Logout,
    /// List class sections and today's progress
    Classes,
    /// Select a class, capture a still and start recognition
    Select {
        class_id: String,
        /// Wait for recognition to finish and print the draft
        #[arg(short, long)]
        wait: bool,
    },
    /// Capture a new still for the selected class
    Retake {
        #[arg(short, long)]
        wait: bool,
    },
    /// Show the draft under review
    Review,
    /// Flip a student between present and absent
    Toggle { student_id: String },
    /// Set every student in the draft to one status
    MarkAll {
        #[arg(default_value = "PRESENT")]
        status: String,
    },
    /// Mark every student in the draft absent
    UnmarkAll,
    /// Add a student that recognition missed
    AddStudent {
        name: String,
        roll_number: String,
        #[arg(long)]
        photo_url: Option<String>,
    },
    /// Commit the draft to the roster
    Commit,
    /// Abandon the session without committing
    Cancel,
    /// Show daemon status
    Status,
    /// Run camera diagnostics
    Test {
        /// V4L2 device to test
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
        /// Read the still from an image file instead of a camera
        #[arg(long)]
        image: Option<PathBuf>,
        /// Write the captured JPEG here
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 80)]
        quality: u8,
    },
}

#[zbus::proxy(
    interface = "org.rollcall.Attendance1",
    default_service = "org.rollcall.Attendance1",
    default_path = "/org/rollcall/Attendance1"
)]
trait Attendance {
    fn login(&self, operator: &str, secret: &str) -> zbus::Result<()>;
    fn logout(&self) -> zbus::Result<()>;
    fn list_classes(&self) -> zbus::Result<String>;
    fn select_class(&self, class_id: &str) -> zbus::Result<String>;
    fn retake(&self) -> zbus::Result<String>;
    fn await_analysis(&self) -> zbus::Result<String>;
    fn review(&self) -> zbus::Result<String>;
    fn toggle(&self, student_id: &str) -> zbus::Result<bool>;
    fn mark_all(&self, status: &str) -> zbus::Result<()>;
    fn unmark_all(&self) -> zbus::Result<()>;
    fn add_student(&self, name: &str, roll_number: &str, photo_url: &str) -> zbus::Result<String>;
    fn commit(&self) -> zbus::Result<String>;
    fn cancel(&self) -> zbus::Result<()>;
    fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Login { operator, secret } => {
            connect().await?.login(&operator, &secret).await?;
            println!("Logged in as {operator}");
        }
        Commands::Logout => {
            connect().await?.logout().await?;
            println!("Logged out");
        }
        Commands::Classes => print_classes(&connect().await?.list_classes().await?)?,
        Commands::Select { class_id, wait } => {
            let proxy = connect().await?;
            let status = proxy.select_class(&class_id).await?;
            finish_capture(&proxy, &status, wait).await?;
        }
        Commands::Retake { wait } => {
            let proxy = connect().await?;
            let status = proxy.retake().await?;
            finish_capture(&proxy, &status, wait).await?;
        }
        Commands::Review => print_review(&connect().await?.review().await?)?,
        Commands::Toggle { student_id } => {
            if connect().await?.toggle(&student_id).await? {
                println!("Toggled {student_id}");
            } else {
                println!("No student {student_id} in the draft");
            }
        }
        Commands::MarkAll { status } => {
            connect().await?.mark_all(&status).await?;
            println!("Marked everyone {}", status.to_uppercase());
        }
        Commands::UnmarkAll => {
            connect().await?.unmark_all().await?;
            println!("Marked everyone ABSENT");
        }
        Commands::AddStudent {
            name,
            roll_number,
            photo_url,
        } => {
            let added = connect()
                .await?
                .add_student(&name, &roll_number, photo_url.as_deref().unwrap_or(""))
                .await?;
            print_json(&added)?;
        }
        Commands::Commit => {
            let receipt: serde_json::Value = serde_json::from_str(&connect().await?.commit().await?)?;
            println!(
                "Attendance committed for {}: {} present, {} absent",
                receipt["classId"].as_str().unwrap_or("?"),
                receipt["present"],
                receipt["absent"],
            );
        }
        Commands::Cancel => {
            connect().await?.cancel().await?;
            println!("Session cancelled");
        }
        Commands::Status => print_json(&connect().await?.status().await?)?,
        Commands::Test {
            device,
            image,
            output,
            quality,
        } => run_diagnostics(&device, image.as_ref(), output.as_ref(), quality)?,
    }

    Ok(())
}

async fn connect() -> Result<AttendanceProxy<'static>> {
    tracing::debug!("connecting to rollcalld on the session bus");
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    AttendanceProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

async fn finish_capture(proxy: &AttendanceProxy<'_>, status: &str, wait: bool) -> Result<()> {
    if !wait {
        return print_json(status);
    }
    println!("Analyzing classroom...");
    let status: serde_json::Value = serde_json::from_str(&proxy.await_analysis().await?)?;
    if status["phase"] == "REVIEWING" {
        print_review(&proxy.review().await?)
    } else {
        println!("Session ended during analysis (phase {})", status["phase"]);
        Ok(())
    }
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_classes(raw: &str) -> Result<()> {
    let dashboard: serde_json::Value = serde_json::from_str(raw)?;
    println!("Present today: {}", dashboard["totalPresent"]);
    for class in dashboard["classes"].as_array().into_iter().flatten() {
        println!(
            "  {:<6} {:<12} grade {:<3} {}/{} marked",
            class["id"].as_str().unwrap_or("?"),
            class["name"].as_str().unwrap_or("?"),
            class["grade"].as_str().unwrap_or("?"),
            class["marked"],
            class["totalStudents"],
        );
    }
    Ok(())
}

fn print_review(raw: &str) -> Result<()> {
    let review: serde_json::Value = serde_json::from_str(raw)?;
    let analysis = &review["analysis"];
    if analysis["outcome"] == "fallback" {
        println!("Recognition unavailable ({}); mark manually.", analysis["reason"]);
    }
    if let Some(description) = analysis["result"]["environmentDescription"].as_str() {
        println!("Scene: {description}");
    }
    println!(
        "Present {}/{} (people detected: {})",
        review["present"], review["total"], analysis["result"]["studentCount"],
    );
    for student in review["students"].as_array().into_iter().flatten() {
        let confidence = student["confidence"]
            .as_f64()
            .map(|c| format!(" ({:.0}%)", c * 100.0))
            .unwrap_or_default();
        println!(
            "  [{:<8}] {:<8} {:<6} {}{}",
            student["status"].as_str().unwrap_or("?"),
            student["id"].as_str().unwrap_or("?"),
            student["rollNumber"].as_str().unwrap_or("?"),
            student["name"].as_str().unwrap_or("?"),
            confidence,
        );
    }
    Ok(())
}

fn run_diagnostics(
    device: &str,
    image: Option<&PathBuf>,
    output: Option<&PathBuf>,
    quality: u8,
) -> Result<()> {
    println!("Running camera diagnostics...");

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for d in &devices {
        println!("  {} {} (driver {}, bus {})", d.path, d.name, d.driver, d.bus);
    }

    let source: Box<dyn StillSource> = match image {
        Some(path) => Box::new(ImageFileSource::new(path, quality)),
        None => {
            let camera = Camera::open(device, quality)
                .with_context(|| format!("failed to open {device}"))?;
            println!(
                "Opened {} at {}x{} ({:?})",
                camera.device_path,
                camera.width,
                camera.height,
                camera.pixel_format()
            );
            Box::new(camera)
        }
    };

    source.warm_up(4)?;
    let still = source.capture_still()?;
    println!("Captured {} ({} bytes, {})", source.describe(), still.len(), still.mime_type);

    if let Some(path) = output {
        std::fs::write(path, &still.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Saved to {}", path.display());
    }

    Ok(())
}
