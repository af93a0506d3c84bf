mod cli;

use std::fs;
use std::io;

use chkfs_fuse::ImageBuilder;
use clap::Parser;
use cli::Cli;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nout={:?}", cli.source, cli.out);

    let mut builder = ImageBuilder::new(cli.nblocks, cli.ninodes);

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .expect("file name is not valid UTF-8");
        let data = fs::read(entry.path())?;
        println!("file: {name:?} ({} bytes)", data.len());
        builder.add_file(&name, &data);
    }

    builder.write_to(&cli.out)
}
