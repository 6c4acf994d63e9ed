//! Directive-by-directive config file parser, trimmed from the teacher's
//! much larger directive set down to what this server actually honors plus
//! a couple of ambient extras (`include`, `maxclients`) pulled in from the
//! original implementation.

use std::env::set_current_dir;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::process::exit;

use crate::util::LogLevel;

#[derive(Clone, Copy)]
pub struct SaveParam {
    pub seconds: u64,
    pub changes: u64,
}

pub struct Config {
    pub port: u16,
    pub bind_addr: String,
    pub timeout_secs: i64,
    pub databases: usize,
    pub dump_file: String,
    pub log_file: String,
    pub verbosity: LogLevel,
    pub save_params: Vec<SaveParam>,
    pub max_clients: u32,
}

impl Config {
    pub fn new() -> Self {
        Config {
            port: 6380,
            bind_addr: String::new(),
            timeout_secs: 0,
            databases: 16,
            dump_file: "dump.cdb".to_string(),
            log_file: String::new(),
            verbosity: LogLevel::Notice,
            save_params: vec![
                SaveParam { seconds: 3600, changes: 1 },
                SaveParam { seconds: 300, changes: 100 },
                SaveParam { seconds: 60, changes: 10000 },
            ],
            max_clients: 0,
        }
    }

    /// Loads directives from `filename`, overwriting defaults. The first
    /// `save` directive encountered clears the built-in schedule so a
    /// config file fully owns the policy once it sets any.
    pub fn load_file(&mut self, filename: &str) {
        let mut cleared_save_params = false;
        self.load_file_inner(filename, &mut cleared_save_params);
    }

    fn load_file_inner(&mut self, filename: &str, cleared_save_params: &mut bool) {
        let file = File::open(filename).unwrap_or_else(|e| {
            eprintln!("*** FATAL CONFIG FILE ERROR ***");
            eprintln!("Can't open config file '{filename}': {e}");
            exit(1);
        });

        let fail = |line_num: usize, line: &str, err: &str| -> ! {
            eprintln!("*** FATAL CONFIG FILE ERROR ***");
            eprintln!("Reading the configuration file, at line {line_num}");
            eprintln!(">>> '{line}'");
            eprintln!("{err}");
            exit(1);
        };

        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line.unwrap_or_else(|e| fail(line_num + 1, "", &e.to_string()));
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let argv: Vec<&str> = trimmed.split_whitespace().collect();
            let argc = argv.len();
            match argv[0].to_ascii_lowercase().as_str() {
                "port" if argc == 2 => match argv[1].parse() {
                    Ok(p) => self.port = p,
                    Err(e) => fail(line_num + 1, trimmed, &e.to_string()),
                },
                "bind" if argc == 2 => self.bind_addr = argv[1].to_string(),
                "timeout" if argc == 2 => match argv[1].parse() {
                    Ok(t) => self.timeout_secs = t,
                    Err(e) => fail(line_num + 1, trimmed, &e.to_string()),
                },
                "databases" if argc == 2 => match argv[1].parse() {
                    Ok(n) if n > 0 => self.databases = n,
                    _ => fail(line_num + 1, trimmed, "Invalid number of databases"),
                },
                "dir" if argc == 2 => {
                    if let Err(e) = set_current_dir(argv[1]) {
                        fail(line_num + 1, trimmed, &format!("Can't chdir to '{}': {e}", argv[1]));
                    }
                },
                "dbfilename" if argc == 2 => self.dump_file = argv[1].to_string(),
                "loglevel" if argc == 2 => {
                    self.verbosity = match argv[1].to_ascii_lowercase().as_str() {
                        "debug" => LogLevel::Debug,
                        "verbose" => LogLevel::Verbose,
                        "notice" => LogLevel::Notice,
                        "warning" => LogLevel::Warning,
                        _ => fail(line_num + 1, trimmed, "Invalid log level. Must be one of debug, verbose, notice or warning"),
                    };
                },
                "logfile" if argc == 2 => match argv[1] {
                    "stdout" => self.log_file.clear(),
                    filename if !filename.is_empty() => {
                        if let Err(e) = OpenOptions::new().create(true).append(true).open(filename) {
                            fail(line_num + 1, trimmed, &format!("Can't open the log file: {e}"));
                        }
                        self.log_file = filename.to_string();
                    },
                    _ => fail(line_num + 1, trimmed, "logfile can't be empty"),
                },
                "save" if argc == 3 => {
                    let seconds: Result<u64, _> = argv[1].parse();
                    let changes: Result<u64, _> = argv[2].parse();
                    match (seconds, changes) {
                        (Ok(seconds), Ok(changes)) if seconds >= 1 => {
                            if !*cleared_save_params {
                                self.save_params.clear();
                                *cleared_save_params = true;
                            }
                            self.save_params.push(SaveParam { seconds, changes });
                        },
                        _ => fail(line_num + 1, trimmed, "Invalid save parameters"),
                    }
                },
                "maxclients" if argc == 2 => match argv[1].parse() {
                    Ok(m) => self.max_clients = m,
                    Err(e) => fail(line_num + 1, trimmed, &e.to_string()),
                },
                "include" if argc == 2 => self.load_file_inner(argv[1], cleared_save_params),
                _ => fail(line_num + 1, trimmed, "Bad directive or wrong number of arguments"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_three_save_params() {
        let c = Config::new();
        assert_eq!(c.save_params.len(), 3);
        assert_eq!(c.port, 6380);
        assert_eq!(c.databases, 16);
    }
}
