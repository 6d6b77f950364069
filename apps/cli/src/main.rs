mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "press")]
#[command(about = "A blog-aware static site generator", long_about = None)]
struct Cli {
    /// Site directory
    #[arg(long, short, global = true, default_value = ".")]
    source: PathBuf,

    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Post,
    Page,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new site
    Init {
        name: String,
    },
    /// Create a post or page source file
    New {
        #[arg(value_enum)]
        kind: Kind,

        title: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "md")]
        format: String,
    },
    Build {
        /// Rebuild even if nothing changed since the last build
        #[arg(long)]
        force: bool,

        #[arg(long)]
        drafts: bool,
    },
    Clean,
    Serve {
        #[arg(long)]
        drafts: bool,

        #[arg(long, default_value = "3000")]
        port: u16,

        #[arg(long)]
        open: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "press_ssg=debug,press=debug"
    } else {
        "press_ssg=info,press=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { name } => commands::init_site(&cli.source.join(name)),
        Commands::New {
            kind,
            title,
            name,
            format,
        } => {
            let kind = match kind {
                Kind::Post => press_ssg::NewContentKind::Post,
                Kind::Page => press_ssg::NewContentKind::Page,
            };
            commands::new_content(&cli.source, kind, &title, name.as_deref(), &format)
        }
        Commands::Build { force, drafts } => commands::build_site(&cli.source, force, drafts),
        Commands::Clean => commands::clean_site(&cli.source),
        Commands::Serve {
            drafts,
            port,
            open,
        } => commands::serve_site(&cli.source, drafts, port, open).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}
