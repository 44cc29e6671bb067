pub mod init;
pub mod repl;
pub mod run;
pub mod tools;
