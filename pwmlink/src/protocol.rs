//! Text commands understood by the relay daemon.

use std::{fmt, str::FromStr};

use shared::MAX_DUTY;

use crate::Error;

const PWM_KEYWORD: &str = "pwm";
const PING_KEYWORD: &str = "ping";
const IS_ALIVE: &str = "is_alive";
const NOT_ALIVE: &str = "not_alive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set the duty of each listed channel, `(channel, percent)`
    Pwm(Vec<(u16, u8)>),
    /// Liveness probe, changes nothing
    Ping,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pwm(duties) => {
                let channels: Vec<String> = duties.iter().map(|(ch, _)| ch.to_string()).collect();
                let percents: Vec<String> = duties.iter().map(|(_, d)| d.to_string()).collect();

                write!(f, "{} {} {}", PWM_KEYWORD, channels.join(","), percents.join(","))
            }
            Self::Ping => f.write_str(PING_KEYWORD),
        }
    }
}

fn parse_list<T: FromStr>(list: &str, line: &str) -> Result<Vec<T>, Error> {
    list.split(',')
        .map(|item| {
            item.trim()
                .parse()
                .map_err(|_| Error::Malformed(line.to_owned()))
        })
        .collect()
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();

        match words.next() {
            Some(PING_KEYWORD) => Ok(Self::Ping),
            Some(PWM_KEYWORD) => {
                let (Some(channels), Some(percents), None) = (words.next(), words.next(), words.next())
                else {
                    return Err(Error::Malformed(line.to_owned()));
                };

                let channels: Vec<u16> = parse_list(channels, line)?;
                let percents: Vec<u8> = parse_list(percents, line)?;

                if channels.len() != percents.len() || percents.iter().any(|p| *p > MAX_DUTY) {
                    return Err(Error::Malformed(line.to_owned()));
                }

                Ok(Self::Pwm(channels.into_iter().zip(percents).collect()))
            }
            _ => Err(Error::Malformed(line.to_owned())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    IsAlive,
    NotAlive,
}

impl Reply {
    #[inline]
    pub fn from_alive(alive: bool) -> Self {
        match alive {
            true => Self::IsAlive,
            false => Self::NotAlive,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IsAlive => IS_ALIVE,
            Self::NotAlive => NOT_ALIVE,
        })
    }
}

impl FromStr for Reply {
    type Err = Error;

    fn from_str(reply: &str) -> Result<Self, Self::Err> {
        match reply.trim() {
            IS_ALIVE => Ok(Self::IsAlive),
            NOT_ALIVE => Ok(Self::NotAlive),
            other => Err(Error::UnexpectedReply(other.to_owned())),
        }
    }
}
