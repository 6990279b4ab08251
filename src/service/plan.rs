const HOUR: i64 = 3600;
const DAY: i64 = 24 * HOUR;

/// Spaced-repetition schedule between `start` and `finish` (unix seconds).
///
/// Session `x` falls at `a*x^2 + b*x + start`. From the fourth session on,
/// dates snap to `preferred_time` seconds into their day, and a session
/// landing on the same day as the previous one is dropped.
pub fn training_plan(start: i64, finish: i64, preferred_time: i64) -> Vec<i64> {
    let b = (32 * HOUR - 24 * HOUR) / 2;
    let a = 8 * HOUR - b;

    let mut plan = Vec::new();
    let mut last = 0;
    let mut x = 0;

    loop {
        let mut date = a * x * x + b * x + start;
        if date > finish {
            break;
        }

        if x > 2 {
            date = date / DAY * DAY + preferred_time;
            if date / DAY == last / DAY {
                x += 1;
                continue;
            }
        }

        plan.push(date);
        last = date;
        x += 1;
    }

    plan
}
