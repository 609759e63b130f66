use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Arg, ArgMatches, Command};

use crate::config::Settings;
use crate::retry::{FailurePrompt, RetryDecision};
use crate::serial::{IpxProtocol, SerialInterface, Uid};
use crate::workflow::{ConfigurationSession, MemoryReport, SessionStatus, SystemPort};

pub fn build_command() -> Command {
    Command::new("ipx-config")
        .about("Configure, calibrate and verify IPX extensometer strings")
        .subcommand_required(true)
        .arg(
            Arg::new("port")
                .long("port")
                .short('p')
                .global(true)
                .help("Serial port the sensor string is connected to"),
        )
        .arg(
            Arg::new("baud")
                .long("baud")
                .short('b')
                .global(true)
                .value_parser(clap::value_parser!(u32))
                .help("Baud rate the sensors currently use"),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .short('s')
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("JSON settings file"),
        )
        .arg(
            Arg::new("no-verify")
                .long("no-verify")
                .global(true)
                .help("Do not check confirmation phrases in replies")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(Command::new("ports").about("List serial ports on this machine"))
        .subcommand(Command::new("list").about("List sensor UIDs on the bus"))
        .subcommand(
            Command::new("status")
                .about("Show the status of one sensor")
                .arg(uid_arg("uid", "Sensor UID")),
        )
        .subcommand(
            Command::new("raw")
                .about("Read one raw sample from a sensor")
                .arg(uid_arg("uid", "Sensor UID")),
        )
        .subcommand(
            Command::new("set-uid")
                .about("Give a sensor a new UID")
                .arg(uid_arg("from", "Current UID"))
                .arg(uid_arg("to", "New UID")),
        )
        .subcommand(
            Command::new("configure")
                .about("Run the full configuration session")
                .arg(
                    Arg::new("sensors")
                        .long("sensors")
                        .short('n')
                        .required(true)
                        .value_parser(clap::value_parser!(usize))
                        .help("Number of sensors on the string, without the check sensor"),
                )
                .arg(
                    Arg::new("report")
                        .long("report")
                        .short('o')
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("Write the session report to this file instead of stdout"),
                ),
        )
}

fn uid_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .required(true)
        .value_parser(clap::value_parser!(Uid))
        .help(help)
}

/// Asks on the terminal.
pub struct TerminalPrompt;

impl FailurePrompt for TerminalPrompt {
    fn decide(&mut self, failure: &str) -> RetryDecision {
        let stdin = io::stdin();
        loop {
            eprint!("{}\n[r]etry, [s]kip or [a]bort? ", failure);
            let _ = io::stderr().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return RetryDecision::Abort,
                Ok(_) => {}
            }
            match line.trim().to_ascii_lowercase().as_str() {
                "r" | "retry" => return RetryDecision::Retry,
                "s" | "skip" => return RetryDecision::Skip,
                "a" | "abort" => return RetryDecision::Abort,
                other => eprintln!("Unknown choice '{}'", other),
            }
        }
    }
}

fn load_settings(matches: &ArgMatches) -> anyhow::Result<Settings> {
    let mut settings = match matches.get_one::<PathBuf>("settings") {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(port) = matches.get_one::<String>("port") {
        settings.serial.port = Some(port.clone());
    }
    if let Some(&baud) = matches.get_one::<u32>("baud") {
        settings.serial.baud_rate = baud;
    }
    if matches.get_flag("no-verify") {
        settings.serial.verify_responses = false;
    }
    Ok(settings)
}

fn port_name(settings: &Settings) -> anyhow::Result<&str> {
    settings
        .serial
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("No serial port given, use --port or the settings file"))
}

fn connect(settings: &Settings) -> anyhow::Result<IpxProtocol> {
    let port = port_name(settings)?;
    let interface = SerialInterface::open(
        port,
        settings.serial.baud_rate,
        settings.serial.read_timeout(),
    )
    .with_context(|| format!("Cannot open {}", port))?;
    Ok(IpxProtocol::new(interface)
        .with_listen(settings.listen.clone())
        .with_verification(settings.serial.verify_responses))
}

fn uid(matches: &ArgMatches, name: &str) -> anyhow::Result<Uid> {
    matches
        .get_one::<Uid>(name)
        .copied()
        .ok_or_else(|| anyhow!("Missing --{}", name))
}

pub fn run() -> anyhow::Result<()> {
    let matches = build_command().get_matches();
    let settings = load_settings(&matches)?;

    match matches.subcommand() {
        Some(("ports", _)) => {
            for port in serialport::available_ports()? {
                println!("{}", port.port_name);
            }
        }
        Some(("list", _)) => {
            let mut ipx = connect(&settings)?;
            for uid in ipx.list_uids()? {
                println!("{}", uid);
            }
        }
        Some(("status", sub)) => {
            let mut ipx = connect(&settings)?;
            let mut fields: Vec<_> = ipx.get_status(uid(sub, "uid")?)?.into_iter().collect();
            fields.sort();
            for (key, value) in fields {
                println!("{}: {}", key, value);
            }
        }
        Some(("raw", sub)) => {
            let mut ipx = connect(&settings)?;
            println!("{:?}", ipx.get_raw(uid(sub, "uid")?)?);
        }
        Some(("set-uid", sub)) => {
            let mut opener = SystemPort::new(port_name(&settings)?, settings.serial.read_timeout());
            let mut prompt = TerminalPrompt;
            let mut report = MemoryReport::new(port_name(&settings)?);
            let mut session =
                ConfigurationSession::new(&settings, &mut opener, &mut prompt, &mut report);
            let sample = session.update_uid(uid(sub, "from")?, uid(sub, "to")?)?;
            println!("{:?}", sample);
        }
        Some(("configure", sub)) => {
            let expected = sub
                .get_one::<usize>("sensors")
                .copied()
                .ok_or_else(|| anyhow!("Missing --sensors"))?;
            let port = port_name(&settings)?;
            let mut opener = SystemPort::new(port, settings.serial.read_timeout());
            let mut prompt = TerminalPrompt;
            let mut report = MemoryReport::new(port);

            let status =
                ConfigurationSession::new(&settings, &mut opener, &mut prompt, &mut report)
                    .run(expected);

            let json = serde_json::to_string_pretty(&report)?;
            match sub.get_one::<PathBuf>("report") {
                Some(path) => std::fs::write(path, json)
                    .with_context(|| format!("Cannot write report to {}", path.display()))?,
                None => println!("{}", json),
            }
            if let SessionStatus::Failed(reason) = status {
                return Err(anyhow!(reason));
            }
            eprintln!("{}", status);
        }
        Some((other, _)) => return Err(anyhow!("Unknown command '{}'", other)),
        None => return Err(anyhow!("No command given")),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_well_formed() {
        build_command().debug_assert();
    }

    #[test]
    fn test_flags_override_settings() {
        let matches = build_command()
            .try_get_matches_from([
                "ipx-config",
                "list",
                "--port",
                "/dev/ttyUSB1",
                "--baud",
                "9600",
                "--no-verify",
            ])
            .unwrap();
        let settings = load_settings(&matches).unwrap();
        assert_eq!(settings.serial.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(settings.serial.baud_rate, 9600);
        assert!(!settings.serial.verify_responses);
    }

    #[test]
    fn test_configure_requires_sensor_count() {
        assert!(build_command()
            .try_get_matches_from(["ipx-config", "configure"])
            .is_err());
    }
}
