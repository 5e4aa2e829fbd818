//! Static replies and quota captions.

use chrono::{Local, Utc};

use crate::quota::{Admission, QuotaRecord};
use crate::utils::format_duration;

pub const START: &str = "Welcome to YouTube Download bot. Type /help for more information.";

pub const HELP: &str = "1. Send me a link and I will download it for you.\n\
2. In groups, prefix the link with /ytdl, e.g. `/ytdl https://www.youtube.com/watch?v=...`\n\
3. Tap the `audio` button under a video to get its soundtrack.\n\
4. Every user has a daily quota, see /vip to get more.\n\
5. Supported sites are listed at https://github.com/yt-dlp/yt-dlp/blob/master/supportedsites.md";

pub const ABOUT: &str = "YouTube-DL bot, downloads media with yt-dlp and converts it with ffmpeg.";

pub const TERMS: &str = "1. You may only download media you have the right to download.\n\
2. Files are deleted from the server as soon as they are sent.\n\
3. The service is provided as is, without any guarantee of availability.";

pub const VIP: &str = "Need more downloads? Pay for extra quota and send the order id or payment token like this:\n\
/vip <token>";

pub const VIP_PAY: &str = "Verifying your payment, please wait...";

pub const INVALID_INPUT: &str = "I think you should send me a link.";

/// Reply for a denied admission
pub fn quota_exceeded(admission: &Admission) -> String {
    let retry_secs = admission.retry_after.num_seconds().max(1);
    let refresh_time = admission
        .window_reset_at
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S");
    format!(
        "Quota exceed, try again in {} seconds({})",
        retry_secs, refresh_time
    )
}

/// Caption reporting what is left of a quota
pub fn remaining_quota_caption(record: &QuotaRecord) -> String {
    let refresh_in = (record.window_reset_at - Utc::now()).num_seconds();
    format!(
        "Remaining quota: {} requests, refreshes in {}.",
        record.remaining,
        format_duration(refresh_in as f64)
    )
}
