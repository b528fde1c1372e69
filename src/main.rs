//! cfgedit - read and safely rewrite assignments in executable config scripts

use cfgedit::cli::{run, CfgEditCli};
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    run(CfgEditCli::parse())
}
