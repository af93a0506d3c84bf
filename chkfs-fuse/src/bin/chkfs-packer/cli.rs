use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Source directory whose files go into the root directory
    #[arg(long, short)]
    pub source: PathBuf,

    /// Output image path
    #[arg(long, short = 'O')]
    pub out: PathBuf,

    /// Total blocks in the image
    #[arg(long, default_value_t = 2048)]
    pub nblocks: u32,

    /// Inode table capacity
    #[arg(long, default_value_t = 256)]
    pub ninodes: u32,
}
