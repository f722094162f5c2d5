//! Prints the next ten fire times of a cron expression, optionally in a
//! specific time zone.

use chrono::Utc;
use nextfire::CronExpression;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let expression = match args.get(1) {
        Some(expression) => expression,
        None => {
            println!("Usage: cargo run --example upcoming -- \"[cron expression]\" [time zone]");
            return;
        }
    };

    let timezone = match args.get(2) {
        Some(name) => match name.parse() {
            Ok(tz) => tz,
            Err(err) => {
                println!("{}", err);
                return;
            }
        },
        None => chrono_tz::Tz::UTC,
    };

    match CronExpression::with_timezone(expression, timezone) {
        Ok(cron) => {
            let upcoming: Vec<_> = cron.clone().iter_after(Utc::now()).take(10).collect();
            if upcoming.is_empty() {
                println!("Cron will never match any future time!");
                return;
            }
            for time in upcoming {
                assert!(cron.contains(time));
                println!("{}", time.with_timezone(&cron.timezone()).format("%F %T %Z"));
            }
        }
        Err(err) => println!("{}", err),
    }
}
