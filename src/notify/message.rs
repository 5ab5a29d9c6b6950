use crate::analytics::VisitorEvent;

/// Shown in place of a location component that could not be resolved
pub const UNRESOLVED: &str = "??";

fn or_placeholder(value: &str) -> &str {
    if value.is_empty() {
        UNRESOLVED
    } else {
        value
    }
}

/// Render an event as the human-readable notification text.
pub fn format_message(event: &VisitorEvent) -> String {
    format!(
        "🌐 **New Visitor**\n\n**IP:** {ip}\n**Location:** {city}, {region}, {country}\n**Page:** {method} {path}\n**Bot trap:** {trap}\n**User Agent:** {ua}\n⏰ {ts}",
        ip = event.client_address,
        city = or_placeholder(&event.city),
        region = or_placeholder(&event.region),
        country = or_placeholder(&event.country),
        method = event.method,
        path = event.path,
        trap = if event.bot_trap { "⚠️ YES" } else { "No" },
        ua = event.user_agent,
        ts = event.timestamp,
    )
}
