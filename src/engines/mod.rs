mod cron;

pub use cron::cron;
