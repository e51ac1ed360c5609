//! Termination signals become a quit request the control loop picks up on
//! its next tick, so the strip is blacked out on the way down.

use std::{
    io,
    sync::{Arc, atomic::AtomicBool},
};

#[cfg(unix)]
pub fn quit_flag() -> io::Result<Arc<AtomicBool>> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};

    let flag = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM, SIGHUP] {
        signal_hook::flag::register(signal, Arc::clone(&flag))?;
    }
    debug!("quit signals registered");
    Ok(flag)
}

#[cfg(not(unix))]
pub fn quit_flag() -> io::Result<Arc<AtomicBool>> {
    Ok(Arc::new(AtomicBool::new(false)))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn sighup_raises_the_flag() {
        let flag = quit_flag().unwrap();
        signal_hook::low_level::raise(signal_hook::consts::signal::SIGHUP).unwrap();
        assert!(flag.load(Ordering::Relaxed));
    }
}
