//! Example benchmark program built on [`procbench::Runner`], kept around as a worked example of
//! registering both an in-process function and an external command.
//!
//! ```console
//! $ procbench-demo --rigorous
//! $ procbench-demo --compare-to /bin/true --python /bin/false
//! ```

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use procbench::Runner;

fn main() -> anyhow::Result<()> {
    let mut runner = Runner::new()?;

    runner.bench_func("sleep-1ms", BTreeMap::new(), || {
        thread::sleep(Duration::from_millis(1));
        Ok(())
    })?;

    runner.bench_command("echo-hello", vec!["echo".to_string(), "hello".to_string()])?;

    Ok(())
}
