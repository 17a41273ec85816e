//! Operational command over the append-only store. Exit codes: 0
//! success, 1 configuration error, 2 I/O or corruption, 3 lock
//! contention, 4 anything else.

use structopt::StructOpt;

use std::{ffi, fs, io, process};

use aostor::{err_at, info, util, Error, Id, Info, Result, Store};

/// Options for the aostor command.
#[derive(Clone, StructOpt)]
pub struct Opt {
    #[structopt(long = "config", help = "toml configuration file")]
    config: Option<ffi::OsString>,

    #[structopt(subcommand)]
    subcmd: SubCommand,
}

#[derive(Clone, StructOpt)]
pub enum SubCommand {
    /// store one object read from --file or stdin, print its id.
    Put {
        realm: String,

        #[structopt(long = "file", help = "payload file, stdin when omitted")]
        file: Option<ffi::OsString>,

        #[structopt(long = "content-type", help = "mirrored into the metadata")]
        content_type: Option<String>,
    },
    /// fetch one object by id onto stdout or into --output.
    Get {
        realm: String,

        id: String,

        #[structopt(long = "output", help = "write payload here instead of stdout")]
        output: Option<ffi::OsString>,
    },
    /// drain staging into packs, then merge the index levels.
    Compact { realm: String },
    /// merge the index levels, starting at --level.
    CompactIndices {
        realm: String,

        #[structopt(long = "level", default_value = "0")]
        level: usize,
    },
    /// refresh the in-process file caches for all configured realms.
    FillCaches {
        #[structopt(long = "force")]
        force: bool,
    },
}

fn main() {
    env_logger::init();

    let opts = Opt::from_iter(std::env::args_os());
    let code = match run(opts) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}", err);
            err.to_exit_code()
        }
    };
    process::exit(code);
}

fn run(opts: Opt) -> Result<()> {
    let store = Store::open(opts.config.as_deref());

    match opts.subcmd {
        SubCommand::Put {
            realm,
            file,
            content_type,
        } => {
            let mut meta = Info::default();
            if let Some(content_type) = content_type {
                meta.add("Content-Type", &content_type);
            }
            let id = match file {
                Some(file) => {
                    if let Some(name) = util::basename(&file) {
                        meta.add(info::KEY_ORIGINAL_FILENAME, &name);
                    }
                    let mut fd = err_at!(IOError, fs::File::open(&file), "{:?}", file)?;
                    store.put(&realm, meta, &mut fd)?
                }
                None => store.put(&realm, meta, &mut io::stdin())?,
            };
            println!("{}", id);
            Ok(())
        }
        SubCommand::Get { realm, id, output } => {
            let id: Id = id.parse()?;
            let (meta, mut data) = store.get(&realm, &id)?;
            for (key, value) in meta.as_headers().iter() {
                eprintln!("{}: {}", key, value);
            }
            match output {
                Some(file) => {
                    let mut fd = err_at!(IOError, fs::File::create(&file), "{:?}", file)?;
                    err_at!(IOError, io::copy(&mut data, &mut fd))?;
                }
                None => {
                    err_at!(IOError, io::copy(&mut data, &mut io::stdout()))?;
                }
            }
            Ok(())
        }
        SubCommand::Compact { realm } => store.compact(&realm, None),
        SubCommand::CompactIndices { realm, level } => {
            store.compact_indices(&realm, level, None)
        }
        SubCommand::FillCaches { force } => store.fill_caches(force),
    }
}
