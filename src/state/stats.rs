use std::time::Duration;

/// Counters and round-trip samples accumulated over a session
///
/// Only the send/receive loop writes here. Derived values are computed in
/// [`RunningStats::report`] and never cached.
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    rtts: Vec<Duration>,
    sent: u64,
}

/// Summary derived from [`RunningStats`] at report time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub sent: u64,
    pub received: u64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub avg_rtt: Duration,
    /// Population standard deviation
    pub std_dev_rtt: Duration,
    pub total_rtt: Duration,
    pub loss_pct: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully transmitted echo request
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Record a matched reply
    pub fn record(&mut self, rtt: Duration) {
        self.rtts.push(rtt);
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn received(&self) -> u64 {
        self.rtts.len() as u64
    }

    pub fn rtts(&self) -> &[Duration] {
        &self.rtts
    }

    /// Loss percentage; 100 when nothing was ever sent
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            100.0
        } else {
            let lost = self.sent.saturating_sub(self.received());
            lost as f64 / self.sent as f64 * 100.0
        }
    }

    /// Derive min/max/avg/stddev/total over every recorded RTT
    pub fn report(&self) -> StatsReport {
        let received = self.received();
        let loss_pct = self.loss_pct();

        if self.rtts.is_empty() {
            return StatsReport {
                sent: self.sent,
                received,
                min_rtt: Duration::ZERO,
                max_rtt: Duration::ZERO,
                avg_rtt: Duration::ZERO,
                std_dev_rtt: Duration::ZERO,
                total_rtt: Duration::ZERO,
                loss_pct,
            };
        }

        let min_rtt = self.rtts.iter().copied().min().unwrap_or_default();
        let max_rtt = self.rtts.iter().copied().max().unwrap_or_default();
        let total_rtt: Duration = self.rtts.iter().sum();

        let n = self.rtts.len() as u128;
        let avg_rtt = duration_from_nanos(total_rtt.as_nanos() / n);

        // Population variance: divide by n, not n - 1
        let mean = total_rtt.as_nanos() as f64 / n as f64;
        let variance = self
            .rtts
            .iter()
            .map(|rtt| {
                let d = rtt.as_nanos() as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / n as f64;
        let std_dev_rtt = Duration::from_nanos(variance.sqrt().round() as u64);

        StatsReport {
            sent: self.sent,
            received,
            min_rtt,
            max_rtt,
            avg_rtt,
            std_dev_rtt,
            total_rtt,
            loss_pct,
        }
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
