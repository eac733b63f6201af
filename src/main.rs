use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use mrximg::{describe, parser, restore, ImageError};

#[derive(Parser)]
#[command(
    name = "mrximg",
    version,
    about = "Restore a raw disk image from a Macrium Reflect X backup file"
)]
struct Cli {
    /// Backup image file (.mrimgx or .mrbakx)
    file: PathBuf,

    /// Password for encrypted backups
    #[arg(short, long)]
    password: Option<String>,

    /// Target block device or pre-attached raw image to restore into
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Disk number to restore (defaults to the first disk in the image)
    #[arg(short, long, default_value_t = -1)]
    disk: i32,

    /// Keep the original MBR disk signature / GPT disk GUID
    #[arg(short = 'k', long)]
    keep_id: bool,

    /// Print a structured description of the image and exit
    #[arg(long, alias = "desc")]
    describe: bool,

    /// Dump the embedded JSON metadata and exit
    #[arg(short = 'j', long)]
    json: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\n{e}");
            // A failed write to the target is usually the host refusing
            // access, not a bad backup.
            if cli.output.is_some() && matches!(e, ImageError::Io(_)) {
                eprintln!("Access to the restore target may have been denied.");
                eprintln!("Check host security settings or retry with elevated privileges.");
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> mrximg::Result<()> {
    validate_image_path(&cli.file)?;
    let password = cli.password.clone().unwrap_or_default();

    let layout = parser::read_backup_file(&cli.file, &password, true)?;
    if layout.header.split_file {
        return Err(ImageError::SplitFileNotTerminal);
    }

    if cli.json {
        println!("{}", layout.json_text);
        return Ok(());
    }
    if cli.describe {
        describe::print_description(&layout);
        return Ok(());
    }

    let output = cli.output.clone().ok_or_else(|| {
        ImageError::BadArgument("an output target is required (-o <path>)".into())
    })?;

    println!("Restoring:\t{}", cli.file.display());
    println!("To:\t\t{}\n", output.display());

    let mut last_percent = u64::MAX;
    let mut on_progress = |total: u64, done: u64| {
        if total == 0 {
            return;
        }
        let percent = (done * 100 / total).min(100);
        if percent != last_percent {
            last_percent = percent;
            print!("\rRestored {percent:3}%");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        }
    };

    restore::restore_disk(
        &cli.file,
        &password,
        &output,
        cli.disk,
        cli.keep_id,
        Some(&mut on_progress),
    )?;

    println!("\n\nRestore successful.");
    Ok(())
}

fn validate_image_path(path: &Path) -> mrximg::Result<()> {
    let valid = path
        .extension()
        .map(|e| {
            let e = e.to_string_lossy().to_lowercase();
            e == "mrimgx" || e == "mrbakx"
        })
        .unwrap_or(false);
    if !valid {
        return Err(ImageError::BadArgument(
            "invalid file extension; only .mrimgx and .mrbakx are supported".into(),
        ));
    }
    if !path.exists() {
        return Err(ImageError::BadArgument(format!(
            "file does not exist: {}",
            path.display()
        )));
    }
    Ok(())
}
