//! Replays a session script against a card.

use crate::session::Session;
use anyhow::{Context, Result, bail};
use edu_io::{ScriptLine, Step};

/// Runs `steps` in order and stops at the first failure.
///
/// Returns the number of steps executed.
pub fn run_script(session: &Session, steps: &[ScriptLine]) -> Result<usize> {
    for line in steps {
        run_step(session, line.step).with_context(|| format!("line {}", line.line))?;
    }
    Ok(steps.len())
}

fn run_step(session: &Session, step: Step) -> Result<()> {
    match step {
        Step::Submit(n) => {
            session.submit(n)?;
            println!("submit {n}");
        }
        Step::Wait => {
            session.wait()?;
            println!("completion, value {:#x}", session.value()?);
        }
        Step::Enable => session.enable()?,
        Step::Info => session.print_region()?,
        Step::Liveness(pattern) => {
            if !session.probe_liveness(pattern)? {
                bail!("liveness probe with {pattern:#x} got the wrong echo");
            }
            println!("liveness {pattern:#x} ok");
        }
        Step::Raise(bits) => session.raise(bits)?,
        Step::Expect(expected) => {
            let value = session.value()?;
            if value != expected {
                bail!("expected {expected:#x}, value register holds {value:#x}");
            }
        }
        Step::DumpRegisters => session.print_registers()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use edu_core::DriverConfig;
    use edu_hw::SimConfig;
    use edu_io::parse_script;
    use std::time::Duration;

    fn session() -> Session {
        Session::open(
            SimConfig {
                latency: Duration::from_micros(50),
                ..SimConfig::default()
            },
            DriverConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn replays_two_cycles() {
        let steps = parse_script(
            "info\nliveness 2\nsubmit 3\nwait\nexpect 6\nenable\nsubmit 4\nwait\nexpect 24\nenable\nregs\n",
        )
        .unwrap();
        let session = session();
        assert_eq!(run_script(&session, &steps).unwrap(), steps.len());
        assert_eq!(session.device().gate_stats().consumed, 2);
    }

    #[test]
    fn failed_expectation_reports_its_line() {
        let steps = parse_script("submit 5\nwait\nexpect 121\n").unwrap();
        let err = run_script(&session(), &steps).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.starts_with("line 3"), "{message}");
        assert!(message.contains("0x78"), "{message}");
    }

    #[test]
    fn raised_interrupt_satisfies_a_wait() {
        let steps = parse_script("raise 0x100\nwait\nenable\n").unwrap();
        let session = session();
        run_script(&session, &steps).unwrap();
        assert_eq!(session.device().irq_stats().last_status, 0x100);
    }
}
