//! Parser for EDU session scripts.
//!
//! A script is a sequence of driver operations, one per line:
//!
//! ```text
//! # compute 5!
//! submit 5
//! wait
//! expect 120
//! enable
//! ```
//!
//! Numbers are decimal or `0x` hexadecimal. Everything after `#` is a
//! comment.

use anyhow::{Result, anyhow};
use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case};
use nom::character::complete::{digit1, hex_digit1, space1};
use nom::combinator::{all_consuming, map, map_res, value};
use nom::sequence::{pair, preceded};

/// One driver operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Write an operand to the value register.
    Submit(u32),
    /// Block until the completion interrupt.
    Wait,
    /// Re-arm completion interrupts.
    Enable,
    /// Query and print the BAR bounds.
    Info,
    /// Probe the liveness register with a pattern.
    Liveness(u32),
    /// Raise an interrupt by hand with the given status bits.
    Raise(u32),
    /// Check the value register.
    Expect(u32),
    /// Print every readable register.
    DumpRegisters,
}

/// A step and the 1-based line it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLine {
    pub line: usize,
    pub step: Step,
}

fn number(input: &str) -> IResult<&str, u32> {
    alt((
        map_res(preceded(tag_no_case("0x"), hex_digit1), |h: &str| {
            u32::from_str_radix(h, 16)
        }),
        map_res(digit1, str::parse::<u32>),
    ))(input)
}

fn with_arg<'a>(
    keyword: &'static str,
    step: fn(u32) -> Step,
) -> impl FnMut(&'a str) -> IResult<&'a str, Step> {
    map(preceded(pair(tag(keyword), space1), number), step)
}

fn parse_step(input: &str) -> IResult<&str, Step> {
    alt((
        with_arg("submit", Step::Submit),
        with_arg("liveness", Step::Liveness),
        with_arg("raise", Step::Raise),
        with_arg("expect", Step::Expect),
        value(Step::Wait, tag("wait")),
        value(Step::Enable, tag("enable")),
        value(Step::Info, tag("info")),
        value(Step::DumpRegisters, tag("regs")),
    ))(input)
}

/// Parses a whole script.
///
/// # Arguments
///
/// * `text` - Script source
///
/// # Returns
///
/// The steps in order with their line numbers, or an error naming the first
/// line that does not parse.
pub fn parse_script(text: &str) -> Result<Vec<ScriptLine>> {
    let mut steps = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let code = raw.split_once('#').map_or(raw, |(code, _)| code).trim();
        if code.is_empty() {
            continue;
        }
        let (_, step) = all_consuming(parse_step)(code)
            .map_err(|_| anyhow!("line {}: cannot parse `{}`", idx + 1, code))?;
        steps.push(ScriptLine {
            line: idx + 1,
            step,
        });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_step() {
        let script = "submit 5\nwait\nexpect 120\nenable\ninfo\nliveness 2\nraise 0x100\nregs\n";
        let steps: Vec<Step> = parse_script(script)
            .unwrap()
            .into_iter()
            .map(|l| l.step)
            .collect();
        assert_eq!(
            steps,
            [
                Step::Submit(5),
                Step::Wait,
                Step::Expect(120),
                Step::Enable,
                Step::Info,
                Step::Liveness(2),
                Step::Raise(0x100),
                Step::DumpRegisters,
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let script = "# header\n\n  submit 0xA   # ten\n\twait\n";
        let steps = parse_script(script).unwrap();
        assert_eq!(
            steps,
            [
                ScriptLine {
                    line: 3,
                    step: Step::Submit(10)
                },
                ScriptLine {
                    line: 4,
                    step: Step::Wait
                },
            ]
        );
    }

    #[test]
    fn errors_name_the_line() {
        let err = parse_script("submit 3\nwait\nsubmit\n").unwrap_err();
        assert!(err.to_string().starts_with("line 3:"), "{err}");
    }

    #[test]
    fn rejects_trailing_garbage_and_overflow() {
        assert!(parse_script("waiting").is_err());
        assert!(parse_script("submit 5 6").is_err());
        assert!(parse_script("submit5").is_err());
        assert!(parse_script("expect 4294967296").is_err());
        assert!(parse_script("raise 0x1_0000_0000").is_err());
        assert_eq!(
            parse_script("expect 4294967295").unwrap()[0].step,
            Step::Expect(u32::MAX)
        );
    }
}
