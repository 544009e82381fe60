use macaddr::MacAddr6;

/// Format a MAC address as lowercase colon-separated hex (aa:bb:cc:dd:ee:ff)
pub fn format_mac(mac: &MacAddr6) -> String {
    mac.as_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
