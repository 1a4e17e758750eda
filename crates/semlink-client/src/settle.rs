use std::fmt;
use std::io::{Read, Write};
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;
use std::time::Duration;

use semlink_frame::commands::GET_BUSY_FLAGS;
use semlink_frame::{Args, WireReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::command::CommandChannel;
use crate::error::{ClientError, Result};

/// Set of instrument subsystems a settle wait watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WaitMask(u32);

impl WaitMask {
    pub const NONE: WaitMask = WaitMask(0);
    pub const OPTICS: WaitMask = WaitMask(0x01);
    pub const AUTO: WaitMask = WaitMask(0x02);
    pub const STAGE: WaitMask = WaitMask(0x04);
    pub const VACUUM: WaitMask = WaitMask(0x08);
    pub const SCAN: WaitMask = WaitMask(0x10);

    const NAMES: [(WaitMask, &'static str); 5] = [
        (WaitMask::OPTICS, "OPTICS"),
        (WaitMask::AUTO, "AUTO"),
        (WaitMask::STAGE, "STAGE"),
        (WaitMask::VACUUM, "VACUUM"),
        (WaitMask::SCAN, "SCAN"),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        WaitMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: WaitMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: WaitMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for WaitMask {
    type Output = WaitMask;

    fn bitor(self, rhs: WaitMask) -> WaitMask {
        WaitMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for WaitMask {
    fn bitor_assign(&mut self, rhs: WaitMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for WaitMask {
    type Output = WaitMask;

    fn bitand(self, rhs: WaitMask) -> WaitMask {
        WaitMask(self.0 & rhs.0)
    }
}

impl fmt::Display for WaitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut rest = self.0;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                rest &= !flag.0;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}

/// Parses the `Display` form: names or hex bits joined by `|` or `,`,
/// case-insensitive. `NONE` and the empty string are the empty mask.
impl FromStr for WaitMask {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut mask = WaitMask::NONE;
        for part in s.split(['|', ',']).map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("none") {
                continue;
            }
            if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
                let bits = u32::from_str_radix(hex, 16)
                    .map_err(|_| format!("invalid mask bits {part:?}"))?;
                mask |= WaitMask(bits);
                continue;
            }
            let (flag, _) = Self::NAMES
                .iter()
                .find(|(_, name)| name.eq_ignore_ascii_case(part))
                .ok_or_else(|| format!("unknown subsystem {part:?}"))?;
            mask |= *flag;
        }
        Ok(mask)
    }
}

/// Anything that can report which subsystems are still busy.
pub trait BusyProbe {
    /// Busy subsystems among `mask`.
    fn busy_flags(&mut self, mask: WaitMask) -> Result<WaitMask>;
}

impl<R: Read, W: Write> BusyProbe for CommandChannel<R, W> {
    fn busy_flags(&mut self, mask: WaitMask) -> Result<WaitMask> {
        let args = Args::new().int(mask.bits() as i32).finish();
        let body = self.send(GET_BUSY_FLAGS, &args)?;
        let bits = WireReader::new(&body).i32()?;
        if bits < 0 {
            return Err(ClientError::CommandFailure {
                command: GET_BUSY_FLAGS.to_string(),
                code: bits,
            });
        }
        Ok(WaitMask::from_bits(bits as u32) & mask)
    }
}

/// Polls a [`BusyProbe`] until the masked subsystems are idle.
///
/// The deadline is computed once on entry and re-checked every iteration,
/// so behaviour is deterministic under a manual [`Clock`].
pub struct SettleWaiter<'a> {
    clock: &'a dyn Clock,
    cancel: &'a CancelToken,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> SettleWaiter<'a> {
    pub fn new(
        clock: &'a dyn Clock,
        cancel: &'a CancelToken,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            clock,
            cancel,
            timeout,
            poll_interval,
        }
    }

    /// Block until none of `mask` is busy.
    ///
    /// Returns `Timeout` (not fatal) when the deadline passes first. An
    /// empty mask returns immediately without polling.
    pub fn wait<P: BusyProbe + ?Sized>(&self, probe: &mut P, mask: WaitMask) -> Result<()> {
        if mask.is_empty() {
            return Ok(());
        }

        let deadline = self.clock.now() + self.timeout;
        let mut polls = 0u32;
        loop {
            self.cancel.check()?;

            let busy = probe.busy_flags(mask)?;
            polls += 1;
            if !busy.intersects(mask) {
                debug!(%mask, polls, "settled");
                return Ok(());
            }

            let now = self.clock.now();
            if now >= deadline {
                warn!(%mask, %busy, polls, timeout = ?self.timeout, "settle wait timed out");
                return Err(ClientError::Timeout {
                    operation: format!("settle wait on {mask}"),
                    timeout: self.timeout,
                });
            }
            self.clock
                .sleep(self.poll_interval.min(deadline.saturating_duration_since(now)));
        }
    }
}
