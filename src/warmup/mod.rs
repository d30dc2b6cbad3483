//! Warm-up Controller (spec §4.3). Ramp schedule taken verbatim from the
//! original Python implementation's `setup_smtp_warmup` (SPEC_FULL §4).

use crate::clock::Clock;
use crate::ids::SmtpAccountId;
use chrono::{DateTime, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// day -> daily cap, days 1-30 explicit, day >= 30 capped at 5000.
const RAMP: [(u32, u32); 30] = [
    (1, 10),
    (2, 20),
    (3, 30),
    (4, 40),
    (5, 50),
    (6, 75),
    (7, 100),
    (8, 150),
    (9, 200),
    (10, 250),
    (11, 300),
    (12, 400),
    (13, 500),
    (14, 600),
    (15, 700),
    (16, 800),
    (17, 900),
    (18, 1000),
    (19, 1200),
    (20, 1400),
    (21, 1600),
    (22, 1800),
    (23, 2000),
    (24, 2500),
    (25, 3000),
    (26, 3500),
    (27, 4000),
    (28, 4500),
    (29, 5000),
    (30, 5000),
];

pub fn daily_cap_for_day(day: u32) -> u32 {
    RAMP.iter()
        .find(|(d, _)| *d == day)
        .map(|(_, cap)| *cap)
        .unwrap_or(5000)
}

#[derive(Debug, Clone)]
struct WarmupPlan {
    day: u32,
    daily_cap: u32,
    daily_sent: u32,
    reset_at: DateTime<Utc>,
}

/// Caps daily sends per account according to the ramp schedule, resetting
/// `daily_sent` (and advancing `day`) at a configured local day boundary.
pub struct WarmupController<C: Clock> {
    clock: Arc<C>,
    day_boundary: NaiveTime,
    plans: Mutex<HashMap<SmtpAccountId, WarmupPlan>>,
}

impl<C: Clock> WarmupController<C> {
    pub fn new(clock: Arc<C>, day_boundary: NaiveTime) -> Self {
        Self {
            clock,
            day_boundary,
            plans: Mutex::new(HashMap::new()),
        }
    }

    fn next_reset_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let today_boundary = from.date_naive().and_time(self.day_boundary).and_utc();
        if from < today_boundary {
            today_boundary
        } else {
            (from.date_naive() + chrono::Duration::days(1))
                .and_time(self.day_boundary)
                .and_utc()
        }
    }

    pub async fn set_plan(&self, account: SmtpAccountId, start_day: u32) {
        let now = self.clock.now_utc();
        let mut plans = self.plans.lock().await;
        plans.insert(
            account,
            WarmupPlan {
                day: start_day,
                daily_cap: daily_cap_for_day(start_day),
                daily_sent: 0,
                reset_at: self.next_reset_after(now),
            },
        );
    }

    async fn roll_if_needed(&self, plans: &mut HashMap<SmtpAccountId, WarmupPlan>, account: SmtpAccountId) {
        let now = self.clock.now_utc();
        let plan = plans.entry(account).or_insert_with(|| WarmupPlan {
            day: 1,
            daily_cap: daily_cap_for_day(1),
            daily_sent: 0,
            reset_at: self.next_reset_after(now),
        });
        while now >= plan.reset_at {
            plan.day += 1;
            plan.daily_cap = daily_cap_for_day(plan.day);
            plan.daily_sent = 0;
            plan.reset_at = self.next_reset_after(plan.reset_at);
        }
    }

    pub async fn can_send(&self, account: SmtpAccountId) -> bool {
        let mut plans = self.plans.lock().await;
        self.roll_if_needed(&mut plans, account).await;
        let plan = plans.get(&account).unwrap();
        plan.daily_sent < plan.daily_cap
    }

    pub async fn on_send(&self, account: SmtpAccountId) {
        let mut plans = self.plans.lock().await;
        self.roll_if_needed(&mut plans, account).await;
        if let Some(plan) = plans.get_mut(&account) {
            plan.daily_sent += 1;
        }
    }

    pub async fn current_day(&self, account: SmtpAccountId) -> u32 {
        let mut plans = self.plans.lock().await;
        self.roll_if_needed(&mut plans, account).await;
        plans.get(&account).map(|p| p.day).unwrap_or(1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;

    #[test]
    fn ramp_matches_original_table() {
        assert_eq!(daily_cap_for_day(1), 10);
        assert_eq!(daily_cap_for_day(6), 75);
        assert_eq!(daily_cap_for_day(29), 5000);
        assert_eq!(daily_cap_for_day(30), 5000);
        assert_eq!(daily_cap_for_day(90), 5000);
    }

    #[tokio::test]
    async fn caps_daily_sends_and_resets_at_boundary() {
        let clock = Arc::new(MockClock::new(
            chrono::Utc::now().date_naive().and_hms_opt(1, 0, 0).unwrap().and_utc(),
        ));
        let controller = WarmupController::new(clock.clone(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        let account = SmtpAccountId::new();
        controller.set_plan(account, 1).await;

        for _ in 0..10 {
            assert!(controller.can_send(account).await);
            controller.on_send(account).await;
        }
        assert!(!controller.can_send(account).await);

        clock.advance(std::time::Duration::from_secs(24 * 3600));
        assert!(controller.can_send(account).await);
        assert_eq!(controller.current_day(account).await, 2);
    }
}
