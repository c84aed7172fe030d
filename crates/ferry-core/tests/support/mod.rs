#![allow(dead_code)]

pub mod git;
pub mod local_shell;
pub mod scripted;

use ferry_core::remote::CommandOutput;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn exit(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
