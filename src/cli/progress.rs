use std::time::Instant;

/// Tracks a multi-file run and prints a closing summary
pub struct ProgressIndicator {
    total: usize,
    accepted: usize,
    failed: usize,
    skipped: usize,
    start_time: Instant,
}

impl ProgressIndicator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            accepted: 0,
            failed: 0,
            skipped: 0,
            start_time: Instant::now(),
        }
    }

    fn position(&self) -> usize {
        self.accepted + self.failed + self.skipped + 1
    }

    pub fn start_item(&self, name: &str) {
        println!("Processing: {} ({}/{})", name, self.position(), self.total);
    }

    pub fn complete_item(&mut self, name: &str, accepted: bool, detail: &str) {
        if accepted {
            println!("✓ {}: {}", name, detail);
            self.accepted += 1;
        } else {
            eprintln!("✗ {}: {}", name, detail);
            self.failed += 1;
        }
    }

    pub fn skip_item(&mut self, name: &str, reason: &str) {
        println!("⊚ Skipping {} ({})", name, reason);
        self.skipped += 1;
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn finish(&self) {
        let elapsed = self.start_time.elapsed();
        println!("\n{}", "=".repeat(60));
        println!("Summary:");
        println!("  Total:     {}", self.total);
        println!("  Accepted:  {}", self.accepted);
        println!("  Failed:    {}", self.failed);
        if self.skipped > 0 {
            println!("  Skipped:   {}", self.skipped);
        }
        println!("  Duration:  {:.2}s", elapsed.as_secs_f64());
        println!("{}", "=".repeat(60));
    }
}
