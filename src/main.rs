use clap::{Parser, Subcommand};
use otu_core::{
    ParseTaxonomyArgs, RunArgs, TaggerArgs, TrimmerArgs, parse_taxonomy_process, run_process, tagger_process,
    trimmer_process,
};
use tracing_subscriber::EnvFilter;
use zoe::data::err::OrFail;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clusters a directory of paired-end amplicon reads into an OTU abundance
    /// table with taxonomy.
    Run(RunArgs),
    /// Clips the primer from the start of every read in a FastQ file.
    Trimmer(TrimmerArgs),
    /// Appends a sample barcode label to every read header of a FastQ file.
    Tagger(TaggerArgs),
    /// Converts an RDP classifier report into an OTU taxonomy table.
    ParseTaxonomy(ParseTaxonomyArgs),
}

fn main() {
    let args = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::Run(cmd_args) => run_process(cmd_args).unwrap_or_die("subcommand 'run'"),
        Commands::Trimmer(cmd_args) => trimmer_process(cmd_args).unwrap_or_die("subcommand 'trimmer'"),
        Commands::Tagger(cmd_args) => tagger_process(cmd_args).unwrap_or_die("subcommand 'tagger'"),
        Commands::ParseTaxonomy(cmd_args) => {
            parse_taxonomy_process(cmd_args).unwrap_or_die("subcommand 'parse-taxonomy'")
        }
    }
}
