//! BPF filter synthesis.
//!
//! See pcap-filter(7) for the expression syntax.

use crate::config::Transport;
use crate::interface::NetInterface;

/// Build the filter for a handle bound to `iface` (`None` for capture files).
///
/// The result has the shape `(<transport> <direction> <ports>[ and host <host>])`.
/// The direction is `dst` unless responses are tracked, in which case it is
/// left empty so both directions pass. The host clause is skipped when the
/// host specification names the interface itself.
pub fn build_filter(
    transport: Transport,
    port: u16,
    track_response: bool,
    host: &str,
    iface: Option<&NetInterface>,
) -> String {
    let ports = if port == 0 {
        format!("portrange 0-{}", u16::MAX)
    } else {
        format!("port {}", port)
    };
    let direction = if track_response { "" } else { "dst" };

    let names_device = iface.is_some_and(|iface| iface.is_device(host));
    if host.is_empty() || names_device {
        return format!("({} {} {})", transport, direction, ports);
    }
    format!("({} {} {} and host {})", transport, direction, ports, host)
}

/// Wrap a user-supplied filter in parentheses unless it already is.
pub fn normalize_filter(filter: &str) -> String {
    let mut normalized = String::with_capacity(filter.len() + 2);
    if !filter.starts_with('(') {
        normalized.push('(');
    }
    normalized.push_str(filter);
    if !filter.ends_with(')') {
        normalized.push(')');
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::tests::iface;

    fn eth0() -> NetInterface {
        iface("eth0", 2, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01], &["10.0.0.2"])
    }

    mod build_filter_tests {
        use super::*;

        #[test]
        fn defaults_to_destination_full_range() {
            let filter = build_filter(Transport::Tcp, 0, false, "", Some(&eth0()));
            assert_eq!(filter, "(tcp dst portrange 0-65535)");
        }

        #[test]
        fn tracking_responses_drops_direction() {
            let filter = build_filter(Transport::Tcp, 80, true, "10.0.0.5", Some(&eth0()));
            assert_eq!(filter, "(tcp  port 80 and host 10.0.0.5)");
        }

        #[test]
        fn specific_port_destination_only() {
            let filter = build_filter(Transport::Tcp, 8080, false, "", None);
            assert_eq!(filter, "(tcp dst port 8080)");
        }

        #[test]
        fn interface_name_is_not_a_host() {
            let filter = build_filter(Transport::Tcp, 80, false, "eth0", Some(&eth0()));
            assert_eq!(filter, "(tcp dst port 80)");
        }

        #[test]
        fn interface_index_and_mac_are_not_hosts() {
            let by_index = build_filter(Transport::Tcp, 80, false, "2", Some(&eth0()));
            let by_mac =
                build_filter(Transport::Tcp, 80, false, "aa:bb:cc:dd:ee:01", Some(&eth0()));
            assert_eq!(by_index, "(tcp dst port 80)");
            assert_eq!(by_mac, "(tcp dst port 80)");
        }

        #[test]
        fn interface_address_is_kept_as_host() {
            let filter = build_filter(Transport::Tcp, 80, false, "10.0.0.2", Some(&eth0()));
            assert_eq!(filter, "(tcp dst port 80 and host 10.0.0.2)");
        }
    }

    mod normalize_filter_tests {
        use super::*;

        #[test]
        fn wraps_bare_expression() {
            assert_eq!(normalize_filter("tcp port 80"), "(tcp port 80)");
        }

        #[test]
        fn keeps_parenthesized_expression() {
            assert_eq!(normalize_filter("(tcp port 80)"), "(tcp port 80)");
        }

        #[test]
        fn completes_half_wrapped_expression() {
            assert_eq!(normalize_filter("(tcp port 80"), "(tcp port 80)");
            assert_eq!(normalize_filter("tcp port 80)"), "(tcp port 80)");
        }
    }
}
