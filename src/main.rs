use std::env;
use std::process::exit;
use std::time::Instant;

use cutis_server::config::Config;
use cutis_server::eventloop::ae_main;
use cutis_server::rdb;
use cutis_server::server::{print_banner, Server};
use cutis_server::util::{self, LogLevel};

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut config = Config::new();
    if args.len() == 2 {
        config.load_file(&args[1]);
    } else if args.len() > 2 {
        eprintln!("Usage: ./cutis-server [/path/to/cutis.conf]");
        exit(1);
    } else {
        util::log(
            LogLevel::Debug,
            LogLevel::Warning,
            "",
            "no config file specified, using the default config. In order to specify a config file use './cutis-server /path/to/cutis.conf'",
        );
    }

    let mut server = Server::new(config);
    server.init();
    print_banner(&server);

    let start = Instant::now();
    let dump_file = server.config.dump_file.clone();
    match rdb::load(&mut server, &dump_file) {
        Ok(()) => util::log(
            server.config.verbosity,
            LogLevel::Notice,
            &server.config.log_file,
            &format!("DB loaded from disk: {} seconds", start.elapsed().as_secs()),
        ),
        Err(e) => util::log(server.config.verbosity, LogLevel::Warning, &server.config.log_file, &format!("loading dump file: {e}")),
    }

    util::log(
        server.config.verbosity,
        LogLevel::Notice,
        &server.config.log_file,
        &format!("The server is now ready to accept connections on port {}", server.config.port),
    );

    ae_main(&mut server);
}
