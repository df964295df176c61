/// Upper bound on a presentation-format name (RFC 1035 2.3.4 plus separators).
const MAX_NAME_LEN: usize = 255;

/// First question of a DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickQuestion {
    /// Labels joined with '.', original case, no trailing separator.
    pub qname: String,
    pub qtype: u16,
}

/// Parses only the DNS header and the first question, leaving the rest of the
/// message untouched. Returns None for truncated input or QDCOUNT == 0.
pub fn parse_first_question(packet: &[u8]) -> Option<QuickQuestion> {
    if packet.len() < 12 {
        return None;
    }

    // QDCOUNT at offset 4
    let qd_count = u16::from_be_bytes([packet[4], packet[5]]);
    if qd_count == 0 {
        return None;
    }

    // QNAME starts right after the header
    let mut pos = 12;
    let mut name: Vec<u8> = Vec::with_capacity(64);

    let mut jumped = false;
    let mut max_jumps = 5;
    let mut current_pos = pos;
    let packet_len = packet.len();

    loop {
        if current_pos >= packet_len {
            return None;
        }
        let len = packet[current_pos];

        if len == 0 {
            if !jumped {
                pos = current_pos + 1;
            }
            break;
        }

        if (len & 0xC0) == 0xC0 {
            // Compression pointer
            if packet_len < current_pos + 2 {
                return None;
            }
            if !jumped {
                pos = current_pos + 2;
                jumped = true;
            }
            let offset = (((len as u16) & 0x3F) << 8) | (packet[current_pos + 1] as u16);
            current_pos = offset as usize;
            max_jumps -= 1;
            if max_jumps == 0 {
                return None;
            }
            continue;
        }

        if (len & 0xC0) != 0 {
            // reserved label types
            return None;
        }

        let label_len = len as usize;
        current_pos += 1;
        if packet_len < current_pos + label_len {
            return None;
        }

        if !name.is_empty() {
            name.push(b'.');
        }
        name.extend_from_slice(&packet[current_pos..current_pos + label_len]);
        if name.len() > MAX_NAME_LEN {
            return None;
        }

        current_pos += label_len;
    }

    // QTYPE + QCLASS
    if packet.len() < pos + 4 {
        return None;
    }
    let qtype = u16::from_be_bytes([packet[pos], packet[pos + 1]]);

    Some(QuickQuestion {
        qname: String::from_utf8_lossy(&name).into_owned(),
        qtype,
    })
}

/// Strips the RFC 1035 4.2.2 two-byte length prefix of a DNS-over-TCP segment.
/// Segments carrying no DNS payload (handshake, bare ACKs) yield None.
pub fn strip_tcp_length_prefix(segment: &[u8]) -> Option<&[u8]> {
    if segment.len() < 2 {
        return None;
    }
    let declared = u16::from_be_bytes([segment[0], segment[1]]) as usize;
    let body = &segment[2..];
    if declared == 0 || body.is_empty() {
        return None;
    }
    Some(&body[..declared.min(body.len())])
}
