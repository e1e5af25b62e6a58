// Scenario scripts for the simulated bearer
//
// One step per line, `#` starts a comment:
//
//   accept            install a fresh callback set
//   open <conn>       proxy reports a connection
//   recv <conn> [hex] proxy delivers a PDU (empty when hex is omitted)
//   send <hex>        provisioning layer sends a PDU
//   close <conn>      proxy reports the connection closed
//   clear-tx          provisioning layer drops pending sends
//   wait <secs>       advance simulated time

use anyhow::{Context, Result};
use pbgatt_core::prov::ProvBearer;
use pbgatt_core::{
    BearerConfig, BearerError, ConnHandle, LinkEvent, RecordingCallbacks, SimTransport,
    Simulation, TransportAction,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Accept,
    Open(ConnHandle),
    Recv(ConnHandle, Vec<u8>),
    Send(Vec<u8>),
    Close(ConnHandle),
    ClearTx,
    Wait(Duration),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Accept => write!(f, "accept"),
            Step::Open(conn) => write!(f, "open {}", conn),
            Step::Recv(conn, pdu) => write!(f, "recv {} {}", conn, hex::encode(pdu)),
            Step::Send(pdu) => write!(f, "send {}", hex::encode(pdu)),
            Step::Close(conn) => write!(f, "close {}", conn),
            Step::ClearTx => write!(f, "clear-tx"),
            Step::Wait(duration) => write!(f, "wait {}", duration.as_secs()),
        }
    }
}

fn parse_conn(arg: Option<&str>) -> Result<ConnHandle> {
    let arg = arg.context("Missing connection handle")?;
    let handle: u16 = arg
        .parse()
        .with_context(|| format!("Invalid connection handle: {}", arg))?;
    Ok(ConnHandle(handle))
}

fn parse_hex(arg: Option<&str>) -> Result<Vec<u8>> {
    match arg {
        Some(arg) => hex::decode(arg).with_context(|| format!("Invalid hex payload: {}", arg)),
        None => Ok(Vec::new()),
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let command = words.next().context("Empty step")?;

        let step = match command {
            "accept" => Step::Accept,
            "open" => Step::Open(parse_conn(words.next())?),
            "recv" => {
                let conn = parse_conn(words.next())?;
                Step::Recv(conn, parse_hex(words.next())?)
            }
            "send" => Step::Send(parse_hex(words.next())?),
            "close" => Step::Close(parse_conn(words.next())?),
            "clear-tx" => Step::ClearTx,
            "wait" => {
                let arg = words.next().context("Missing wait duration")?;
                let secs: u64 = arg
                    .parse()
                    .with_context(|| format!("Invalid wait duration: {}", arg))?;
                Step::Wait(Duration::from_secs(secs))
            }
            other => anyhow::bail!("Unknown step: {}", other),
        };

        if let Some(extra) = words.next() {
            anyhow::bail!("Unexpected argument: {}", extra);
        }

        Ok(step)
    }
}

/// Parse a script into steps, skipping blank lines and comments
pub fn parse_script(text: &str) -> Result<Vec<Step>> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                None
            } else {
                Some(line.parse().with_context(|| format!("Line {}", index + 1)))
            }
        })
        .collect()
}

/// What happened while running one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step: Step,
    pub result: Result<(), BearerError>,
    pub timed_out: bool,
    pub events: Vec<LinkEvent>,
    pub actions: Vec<TransportAction>,
}

/// Runs steps against a simulated bearer
pub struct Runner {
    sim: Simulation,
    callbacks: Vec<RecordingCallbacks>,
}

impl Runner {
    pub fn new(config: BearerConfig, rx_buf_size: usize) -> Result<Self> {
        let sim = Simulation::new(config, SimTransport::new(rx_buf_size))
            .context("Failed to create bearer")?;
        Ok(Self {
            sim,
            callbacks: Vec::new(),
        })
    }

    /// The simulation being driven
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Execute one step
    pub fn run(&mut self, step: Step) -> StepReport {
        let mut timed_out = false;

        let result = match &step {
            Step::Accept => self
                .sim
                .accept()
                .map(|callbacks| self.callbacks.push(callbacks)),
            Step::Open(conn) => self.sim.bearer_mut().open(*conn),
            Step::Recv(conn, pdu) => self.sim.bearer_mut().recv(*conn, pdu),
            Step::Send(pdu) => self.sim.bearer_mut().send(pdu),
            Step::Close(conn) => self.sim.bearer_mut().close(*conn),
            Step::ClearTx => {
                self.sim.bearer_mut().clear_tx();
                Ok(())
            }
            Step::Wait(duration) => {
                timed_out = self.sim.advance(*duration);
                Ok(())
            }
        };

        let events = self
            .callbacks
            .iter()
            .flat_map(|callbacks| callbacks.take_events())
            .collect();
        self.callbacks.retain(|callbacks| callbacks.is_attached());

        StepReport {
            step,
            result,
            timed_out,
            events,
            actions: self.sim.transport().take_actions(),
        }
    }

    /// Execute every step in order
    pub fn run_all(&mut self, steps: Vec<Step>) -> Vec<StepReport> {
        steps.into_iter().map(|step| self.run(step)).collect()
    }
}
