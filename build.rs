//! Build script rendering the `meshpool` manual pages.
//!
//! Writes `meshpool.1` plus one `meshpool-<subcommand>.1` page per
//! subcommand into `OUT_DIR` for packaging.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn render(command: Command, out_dir: &Path, file_name: &str) -> io::Result<()> {
    let mut page = Vec::new();
    Man::new(command).render(&mut page)?;
    fs::write(out_dir.join(file_name), page)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let command = Cli::command();
    for subcommand in command.get_subcommands() {
        let name = format!("meshpool-{}", subcommand.get_name());
        let page = subcommand.clone().name(name.clone());
        render(page, &out_dir, &format!("{name}.1"))?;
    }
    render(command, &out_dir, "meshpool.1")?;

    Ok(())
}
