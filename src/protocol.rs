use hickory_proto::op::Query;
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use hickory_proto::serialize::txt::{ParseError as TextParseError, RDataParser};
use std::fmt;
use std::iter::Peekable;
use std::str::{Chars, FromStr};
use thiserror::Error;

/// Receive buffer size, large enough for EDNS0 clients
pub const MAX_PACKET_SIZE: usize = 4096;

/// Cache identity of a question
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct QueryKey {
    // All comparisons of domain names must be case-insensitive per the official DNS protocol. So
    // here we lowercase the domain name before using it as a key. The protocol requires original
    // casing to be preserved when possible, so this value should not be used in other contexts.
    // See https://datatracker.ietf.org/doc/html/rfc4343#section-3
    domain_ascii_lowercase: String,
    qclass: DNSClass,
    qtype: RecordType,
}

impl QueryKey {
    pub fn new(query: &Query) -> Self {
        Self {
            domain_ascii_lowercase: fully_qualified(&query.name().to_ascii()),
            qclass: query.query_class(),
            qtype: query.query_type(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.domain_ascii_lowercase, self.qclass, self.qtype
        )
    }
}

/// Lowercases a host name and appends the root label if missing
pub fn fully_qualified(domain: &str) -> String {
    let mut domain = domain.to_ascii_lowercase();
    if !domain.ends_with('.') {
        domain.push('.');
    }
    domain
}

/// Maps a numeric record type to its text mnemonic.
///
/// Only types listed here can be converted from a DoH JSON answer.
pub fn type_mnemonic(code: u16) -> Option<&'static str> {
    let mnemonic = match code {
        1 => "A",
        2 => "NS",
        5 => "CNAME",
        6 => "SOA",
        12 => "PTR",
        13 => "HINFO",
        15 => "MX",
        16 => "TXT",
        28 => "AAAA",
        33 => "SRV",
        35 => "NAPTR",
        43 => "DS",
        44 => "SSHFP",
        46 => "RRSIG",
        47 => "NSEC",
        48 => "DNSKEY",
        50 => "NSEC3",
        51 => "NSEC3PARAM",
        52 => "TLSA",
        59 => "CDS",
        60 => "CDNSKEY",
        64 => "SVCB",
        65 => "HTTPS",
        99 => "SPF",
        257 => "CAA",
        _ => return None,
    };
    Some(mnemonic)
}

/// Renders a record in presentation format: `name ttl class mnemonic data`
pub fn render_record(name: &str, ttl: u32, mnemonic: &str, data: &str) -> String {
    format!("{} {} {} {} {}", name, ttl, DNSClass::IN, mnemonic, data)
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("missing {0} field")]
    MissingField(&'static str),
    #[error("invalid {field} {value:?}")]
    Invalid { field: &'static str, value: String },
    #[error("unterminated quoted string")]
    UnterminatedQuote,
    #[error("invalid {rtype} data: {source}")]
    Data {
        rtype: RecordType,
        source: TextParseError,
    },
}

/// Parses a single presentation-format record line into a structured record.
///
/// The owner, TTL, class and type fields are read here. The data is handed to
/// hickory's text parser, except TXT which keeps escaped bytes as-is.
pub fn parse_record(line: &str) -> Result<Record, ParseError> {
    let (owner, rest) = next_field(line).ok_or(ParseError::MissingField("owner name"))?;
    let (ttl, rest) = next_field(rest).ok_or(ParseError::MissingField("ttl"))?;
    let (class, rest) = next_field(rest).ok_or(ParseError::MissingField("class"))?;
    let (mnemonic, data) = next_field(rest).ok_or(ParseError::MissingField("type"))?;

    let name = Name::from_ascii(owner).map_err(|_| ParseError::Invalid {
        field: "owner name",
        value: owner.to_owned(),
    })?;
    let ttl: u32 = ttl.parse().map_err(|_| ParseError::Invalid {
        field: "ttl",
        value: ttl.to_owned(),
    })?;
    if !class.eq_ignore_ascii_case("IN") {
        return Err(ParseError::Invalid {
            field: "class",
            value: class.to_owned(),
        });
    }
    let rtype = RecordType::from_str(&mnemonic.to_ascii_uppercase()).map_err(|_| {
        ParseError::Invalid {
            field: "type",
            value: mnemonic.to_owned(),
        }
    })?;

    let data = data.trim();
    if data.is_empty() {
        return Err(ParseError::MissingField("data"));
    }

    let rdata = match rtype {
        RecordType::TXT => {
            let strings = character_strings(data)?;
            RData::TXT(TXT::from_bytes(strings.iter().map(Vec::as_slice).collect()))
        }
        RecordType::SVCB | RecordType::HTTPS => {
            RData::try_from_str(rtype, &unquote_svc_params(data))
                .map_err(|source| ParseError::Data { rtype, source })?
        }
        _ => RData::try_from_str(rtype, data).map_err(|source| ParseError::Data { rtype, source })?,
    };

    Ok(Record::from_rdata(name, ttl, rdata))
}

/// Splits off the first whitespace-delimited field
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

// The SvcParam parser only accepts bare values, `alpn="h2,h3"` becomes `alpn=h2,h3`
fn unquote_svc_params(data: &str) -> String {
    data.split_whitespace()
        .map(|param| match param.split_once('=') {
            Some((key, value))
                if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') =>
            {
                format!("{}={}", key, &value[1..value.len() - 1])
            }
            _ => param.to_owned(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits TXT data into its character strings, honoring double quotes and
/// backslash escapes. `\DDD` is a raw byte, not a code point.
fn character_strings(data: &str) -> Result<Vec<Vec<u8>>, ParseError> {
    let mut strings = Vec::new();
    let mut chars = data.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let mut string = Vec::new();
        if c == '"' {
            chars.next();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => unescape(&mut chars, &mut string)?,
                    Some(c) => push_char(&mut string, c),
                    None => return Err(ParseError::UnterminatedQuote),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                chars.next();
                if c == '\\' {
                    unescape(&mut chars, &mut string)?;
                } else {
                    push_char(&mut string, c);
                }
            }
        }
        strings.push(string);
    }

    Ok(strings)
}

fn push_char(bytes: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn unescape(chars: &mut Peekable<Chars<'_>>, bytes: &mut Vec<u8>) -> Result<(), ParseError> {
    let first = chars.next().ok_or(ParseError::UnterminatedQuote)?;
    if !first.is_ascii_digit() {
        push_char(bytes, first);
        return Ok(());
    }

    let mut digits = String::from(first);
    for _ in 0..2 {
        match chars.next() {
            Some(d) if d.is_ascii_digit() => digits.push(d),
            _ => {
                return Err(ParseError::Invalid {
                    field: "escape",
                    value: digits,
                })
            }
        }
    }
    let byte = digits.parse::<u8>().map_err(|_| ParseError::Invalid {
        field: "escape",
        value: digits,
    })?;
    bytes.push(byte);
    Ok(())
}
