// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the tick workers when TAMBALA_THREAD_PRIORITY is unset.
const DEFAULT_SCHEDULER_THREAD_PRIORITY: u8 = 70;

/// Reads TAMBALA_THREAD_PRIORITY (0-99) once, before the workers start. Invalid or out of
/// range values fall back to the default.
pub fn scheduler_thread_priority() -> u8 {
    parse_priority(std::env::var("TAMBALA_THREAD_PRIORITY").ok().as_deref())
}

fn parse_priority(value: Option<&str>) -> u8 {
    value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_SCHEDULER_THREAD_PRIORITY)
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the tick workers.
/// Enabled unless TAMBALA_DISABLE_RT is set.
pub fn rt_scheduling_enabled() -> bool {
    !env_flag("TAMBALA_DISABLE_RT")
}

/// Raises the calling thread's priority. Failures are logged and otherwise ignored; the
/// scheduler still runs, just with looser timing.
pub fn configure_thread_priority(priority: u8, rt: bool) {
    let priority = match ThreadPriorityValue::try_from(priority) {
        Ok(priority) => priority,
        Err(e) => {
            warn!(priority, error = ?e, "Invalid tick worker priority");
            return;
        }
    };
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise tick worker priority");
    }

    #[cfg(unix)]
    if rt {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for tick worker");
            }
            Err(e) => {
                warn!(error = %e, "Failed to set RT SCHED_FIFO for tick worker");
            }
        }
    }

    #[cfg(not(unix))]
    let _ = rt;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_priority() {
        assert_eq!(parse_priority(None), 70);
        assert_eq!(parse_priority(Some("abc")), 70);
        assert_eq!(parse_priority(Some("150")), 70);
        assert_eq!(parse_priority(Some(" 42 ")), 42);
    }
}
