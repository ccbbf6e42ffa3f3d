//! Definition and implementation of the [`Label`] and [`Name`] types.

use std::cmp::Ordering;
use std::fmt::Display;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, NameError, ParseError};
use crate::vis;

// see RFC 1035, section 2.3.4 "Size limits"
pub const MAX_LABEL: usize = 63;
pub const MAX_NAME: usize = 255;

const RANGE_LD: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANGE_LDH: &[u8] = b"-0123456789abcdefghijklmnopqrstuvwxyz";

/// The alphabet used when synthesizing query names for enumeration.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Alphabet {
    /// All octet values 0x00..=0xff.
    Binary,
    /// Letters, digits and hyphen; the hyphen is not allowed at the first or
    /// last position of a label.
    Ldh,
}

/// Whether DNS message compression is allowed when parsing a [`Name`].
///
/// For example, the next owner name of an NSEC record and the signer name of
/// an RRSIG record must not be compressed, according to the RFCs.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Compression {
    Allowed,
    Prohibited,
}

/// A single DNS label: an octet string of at most 63 bytes.
///
/// Labels are canonicalised to ASCII lowercase on construction. The empty
/// label represents the DNS root and only appears as the last label of a
/// fully qualified [`Name`].
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug, Hash)]
pub struct Label {
    bytes: Vec<u8>,
}

impl Label {
    pub fn new(mut bytes: Vec<u8>) -> Result<Self, NameError> {
        if bytes.len() > MAX_LABEL {
            return Err(NameError::LabelTooLong(bytes.len()));
        }
        bytes.make_ascii_lowercase();
        Ok(Self { bytes })
    }

    /// The empty root label.
    pub fn root() -> Self {
        Self { bytes: Vec::new() }
    }

    /// The label used for an enumeration counter value: lowercase hex.
    pub fn from_hex_counter(counter: u64) -> Self {
        Self {
            bytes: format!("{:x}", counter).into_bytes(),
        }
    }

    /// The smallest non-empty label of the given alphabet.
    pub fn minimum(alphabet: Alphabet) -> Self {
        let bytes = match alphabet {
            Alphabet::Binary => vec![0u8],
            Alphabet::Ldh => vec![RANGE_LD[0]],
        };
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The length of this label in wire format (one length octet plus data).
    pub fn wire_length(&self) -> usize {
        1 + self.bytes.len()
    }

    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        buf.write_u8(self.bytes.len() as u8)?;
        buf.write_all(&self.bytes)?;
        Ok(())
    }

    /// Returns the next label in enumeration order.
    ///
    /// If `extend` is true and there is room, the label is extended by the
    /// smallest symbol of the alphabet; otherwise it is increased like an
    /// odometer. Returns [`NameError::MaxLabelValue`] if the label already
    /// has the maximum value of the alphabet.
    pub fn forward_next(&self, alphabet: Alphabet, extend: bool) -> Result<Label, NameError> {
        if extend {
            let mut extended = self.bytes.clone();
            extended.push(match alphabet {
                Alphabet::Binary => 0u8,
                Alphabet::Ldh => RANGE_LD[0],
            });
            if let Ok(label) = Label::new(extended) {
                return Ok(label);
            }
        }
        match alphabet {
            Alphabet::Binary => self.increase_binary(),
            Alphabet::Ldh => self.increase_ldh(),
        }
    }

    /// Returns true if the label is the last one of the alphabet, i.e. cannot
    /// be increased without growing.
    pub fn has_max_value(&self, alphabet: Alphabet) -> bool {
        match alphabet {
            Alphabet::Binary => self.bytes.iter().all(|&c| c == 0xff),
            Alphabet::Ldh => {
                let last = self.bytes.len().wrapping_sub(1);
                self.bytes.iter().enumerate().all(|(i, &c)| {
                    if i == 0 || i == last {
                        c == *RANGE_LD.last().unwrap()
                    } else {
                        c == *RANGE_LDH.last().unwrap()
                    }
                })
            }
        }
    }

    fn increase_binary(&self) -> Result<Label, NameError> {
        if self.has_max_value(Alphabet::Binary) {
            return Err(NameError::MaxLabelValue);
        }
        let mut bytes = self.bytes.clone();
        for i in (0..bytes.len()).rev() {
            if bytes[i] == 0xff {
                if i == 0 {
                    return Err(NameError::MaxLabelValue);
                }
                bytes[i] = 0;
            } else {
                bytes[i] += 1;
                break;
            }
        }
        Label::new(bytes)
    }

    fn increase_ldh(&self) -> Result<Label, NameError> {
        if self.has_max_value(Alphabet::Ldh) {
            return Err(NameError::MaxLabelValue);
        }
        let mut bytes = self.bytes.clone();
        let last = bytes.len().wrapping_sub(1);
        for i in (0..bytes.len()).rev() {
            // the hyphen is only valid in the middle of a label
            let range = if i == 0 || i == last {
                RANGE_LD
            } else {
                RANGE_LDH
            };
            match range.iter().find(|&&r| bytes[i] < r) {
                Some(&next) => {
                    bytes[i] = next;
                    return Label::new(bytes);
                }
                None => {
                    if i == 0 {
                        return Err(NameError::MaxLabelValue);
                    }
                    bytes[i] = range[0];
                }
            }
        }
        Err(NameError::MaxLabelValue)
    }
}

impl Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", vis::strvis(&self.bytes))
    }
}

/// A DNS domain name.
///
/// A fully qualified name carries the empty root label as its last label, so
/// the wire format is exactly the concatenation of the length-prefixed
/// labels; the terminating zero octet is the root label's length byte.
///
/// `Name`s sort in the canonical DNS order of
/// [RFC 4034, Section 6.1](https://www.rfc-editor.org/rfc/rfc4034#section-6.1):
/// by their most significant (rightmost) labels first, labels compared as
/// lowercased octet strings.
///
/// # Examples
/// ```rust
/// use n3map_proto::name::Name;
///
/// let mut names: Vec<_> = ["z.example.", "example.", "a.example.", "yljkjljk.a.example."]
///     .into_iter()
///     .map(|n| Name::from_ascii(n).unwrap())
///     .collect();
/// names.sort();
/// let sorted: Vec<_> = names.iter().map(|n| n.to_string()).collect();
/// assert_eq!(
///     sorted,
///     ["example.", "a.example.", "yljkjljk.a.example.", "z.example."],
/// );
/// ```
#[derive(Eq, PartialEq, Clone, Debug, Hash)]
pub struct Name {
    labels: Vec<Label>,
}

impl Name {
    pub fn new(labels: Vec<Label>) -> Result<Self, NameError> {
        if labels.is_empty() {
            return Err(NameError::EmptyName);
        }
        let name = Self { labels };
        if name.wire_length() > MAX_NAME {
            return Err(NameError::NameTooLong(name.wire_length()));
        }
        Ok(name)
    }

    /// Returns a `Name` representing the DNS root (`"."`).
    pub fn root() -> Self {
        Self {
            labels: vec![Label::root()],
        }
    }

    /// Constructs a `Name` from an ASCII domain string.
    ///
    /// A trailing dot makes the name fully qualified. No character-set
    /// restrictions are applied beyond ASCII; enumeration may produce and
    /// query names containing arbitrary octets.
    ///
    /// # Examples
    /// ```rust
    /// use n3map_proto::name::Name;
    ///
    /// assert!(Name::from_ascii(".").unwrap().is_root());
    /// assert!(Name::from_ascii("example.com.").is_ok());
    /// assert!(Name::from_ascii("exämple.com.").is_err());
    /// ```
    pub fn from_ascii(name: impl AsRef<str>) -> Result<Self, NameError> {
        let name = name.as_ref();
        if !name.is_ascii() {
            return Err(NameError::InvalidName("invalid encoding".into()));
        }
        if name == "." {
            return Ok(Self::root());
        }
        let parts: Vec<&str> = name.split('.').collect();
        let mut labels = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() && i != parts.len() - 1 {
                return Err(NameError::InvalidName("empty label".into()));
            }
            labels.push(Label::new(part.as_bytes().to_vec())?);
        }
        Self::new(labels)
    }

    /// Like [`Name::from_ascii`], but always returns a fully qualified name.
    pub fn fqdn_from_ascii(name: impl AsRef<str>) -> Result<Self, NameError> {
        let name = name.as_ref();
        if name.ends_with('.') {
            Self::from_ascii(name)
        } else {
            let mut fqdn = String::with_capacity(name.len() + 1);
            fqdn.push_str(name);
            fqdn.push('.');
            Self::from_ascii(fqdn)
        }
    }

    /// Parses a `Name` encoded as a DNS name from the given cursor.
    ///
    /// If `compression` is [`Compression::Prohibited`], trying to parse a
    /// compressed name returns an error.
    pub fn parse(msg: &mut Cursor<&[u8]>, compression: Compression) -> Result<Self, ParseError> {
        let mut labels = Vec::new();
        loop {
            let c = msg.read_u8()?;
            if c == 0 {
                labels.push(Label::root());
                break;
            }
            if (c & 0b1100_0000) == 0b1100_0000 {
                if compression == Compression::Prohibited {
                    return Err(ParseError::CompressionProhibited);
                }
                let offset = (((c & 0b0011_1111) as u16) << 8) + msg.read_u8()? as u16;
                let pos_after_pointer = msg.position();
                msg.seek(SeekFrom::Start(offset as u64))?;
                // recursion handles pointer chains; the pointed-to name ends
                // with the root label
                let mut rest = Name::parse(msg, compression)?;
                labels.append(&mut rest.labels);
                msg.seek(SeekFrom::Start(pos_after_pointer))?;
                break;
            }
            if (c & 0b1100_0000) != 0 {
                return Err(ParseError::InvalidLabelType(c));
            }
            let mut label = vec![0u8; c as usize];
            msg.read_exact(&mut label)?;
            labels.push(Label::new(label)?);
        }
        Ok(Name::new(labels)?)
    }

    /// Encodes this name into the given buffer, without compression.
    ///
    /// Returns the number of bytes written.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let mut written = 0u16;
        for label in &self.labels {
            label.encode_into(buf)?;
            written += label.wire_length() as u16;
        }
        Ok(written)
    }

    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_length());
        // writing to a Vec cannot fail
        self.encode_into(&mut buf).unwrap();
        buf
    }

    /// The length of this name in wire format.
    pub fn wire_length(&self) -> usize {
        self.labels.iter().map(Label::wire_length).sum()
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn is_root(&self) -> bool {
        self.labels.len() == 1 && self.labels[0].is_empty()
    }

    /// Returns true iff this name lies in the given zone (suffix test; a
    /// zone is part of itself).
    ///
    /// # Examples
    /// ```rust
    /// use n3map_proto::name::Name;
    ///
    /// let zone = Name::from_ascii("example.com.").unwrap();
    /// let a = Name::from_ascii("a.example.com.").unwrap();
    /// assert!(a.part_of_zone(&zone));
    /// assert!(zone.part_of_zone(&zone));
    /// assert!(!zone.part_of_zone(&a));
    /// ```
    pub fn part_of_zone(&self, zone: &Name) -> bool {
        if self.labels.len() < zone.labels.len() {
            return false;
        }
        zone.labels
            .iter()
            .rev()
            .zip(self.labels.iter().rev())
            .all(|(z, s)| z == s)
    }

    /// Returns a new name with the given label prepended.
    pub fn prepend(&self, label: Label) -> Result<Name, NameError> {
        let mut labels = Vec::with_capacity(self.labels.len() + 1);
        labels.push(label);
        labels.extend(self.labels.iter().cloned());
        Name::new(labels)
    }

    /// Prepends the minimum label of the alphabet, producing the direct
    /// successor of this name in canonical order.
    pub fn next_label_add(&self, alphabet: Alphabet) -> Result<Name, NameError> {
        self.prepend(Label::minimum(alphabet))
    }

    /// Produces a name strictly after this one by extending the leftmost
    /// label by one symbol if there is room, or else increasing the leftmost
    /// increasable label.
    pub fn next_extend_increase(&self, alphabet: Alphabet) -> Result<Name, NameError> {
        let extend = MAX_NAME > self.wire_length() + 1;
        let mut labels = Vec::with_capacity(self.labels.len());
        let mut increased = false;
        for label in &self.labels {
            // the root label is never part of the enumeration alphabet
            if !increased && !label.is_empty() {
                match label.forward_next(alphabet, extend) {
                    Ok(next) => {
                        labels.push(next);
                        increased = true;
                        continue;
                    }
                    Err(NameError::MaxLabelValue) | Err(NameError::LabelTooLong(_)) => {
                        labels.push(label.clone());
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            labels.push(label.clone());
        }
        if !increased {
            return Err(NameError::NameTooLong(self.wire_length()));
        }
        Name::new(labels)
    }

    /// Splits the name into its first `position` labels and the rest.
    pub fn split(&self, position: usize) -> Result<(Name, Name), NameError> {
        if position == 0 || position >= self.labels.len() {
            return Err(NameError::EmptyName);
        }
        let first = Name::new(self.labels[..position].to_vec())?;
        let second = Name::new(self.labels[position..].to_vec())?;
        Ok((first, second))
    }

    /// Returns true iff this name lies in the closed interval
    /// `[owner, next_owner]`, wrapping around when `owner >= next_owner`
    /// (the last record of a chain points back to the zone apex).
    pub fn covered_by(&self, owner: &Name, next_owner: &Name) -> bool {
        if owner >= next_owner {
            self >= owner || self <= next_owner
        } else {
            self >= owner && self <= next_owner
        }
    }

    /// Like [`Name::covered_by`], but with both interval ends excluded.
    pub fn covered_by_exclusive(&self, owner: &Name, next_owner: &Name) -> bool {
        if owner >= next_owner {
            self > owner || self < next_owner
        } else {
            self > owner && self < next_owner
        }
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        // canonical order: compare most significant (rightmost) labels first
        let mut self_lbls = self.labels.iter().rev();
        let mut other_lbls = other.labels.iter().rev();
        loop {
            match (self_lbls.next(), other_lbls.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(s), Some(o)) => match s.cmp(o) {
                    Ordering::Equal => (),
                    ord => return ord,
                },
            }
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        let last = self.labels.len() - 1;
        for (i, label) in self.labels.iter().enumerate() {
            if i != last {
                write!(f, "{}.", label)?;
            } else {
                write!(f, "{}", label)?;
            }
        }
        Ok(())
    }
}

/// A generator of `(label, counter)` pairs over lowercase-hex counter labels.
pub struct LabelGenerator {
    counter: u64,
}

impl LabelGenerator {
    pub fn hex(init: u64) -> Self {
        Self { counter: init }
    }
}

impl Iterator for LabelGenerator {
    type Item = (Label, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let item = (Label::from_hex_counter(self.counter), self.counter);
        self.counter = self.counter.checked_add(1)?;
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    #[test]
    fn fqdn_keeps_root_label() {
        let n = Name::fqdn_from_ascii("example.com").unwrap();
        assert_eq!(n.num_labels(), 3);
        assert_eq!(n.to_string(), "example.com.");
        assert_eq!(n.to_wire(), b"\x07example\x03com\x00");
    }

    #[test]
    fn wire_roundtrip_with_compression() {
        // "sub.example.com." via a pointer to "example.com." at offset 0
        let bytes: &[u8] = b"\x07example\x03com\x00\x03sub\xc0\x00";
        let mut cursor = Cursor::new(bytes);
        cursor.set_position(13);
        let parsed = Name::parse(&mut cursor, Compression::Allowed).unwrap();
        assert_eq!(parsed, name("sub.example.com."));

        cursor.set_position(13);
        assert!(Name::parse(&mut cursor, Compression::Prohibited).is_err());
    }

    #[test]
    fn canonical_order_follows_rfc4034() {
        // the example ordering from RFC 4034, section 6.1
        let sorted = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
            "\u{1}.z.example.",
        ];
        let mut names: Vec<Name> = sorted.iter().map(|s| name(s)).collect();
        names.reverse();
        names.sort();
        let expect: Vec<Name> = sorted.iter().map(|s| name(s)).collect();
        assert_eq!(names, expect);
    }

    #[test]
    fn apex_sorts_before_subdomains() {
        let zone = name("example.com.");
        let sub = name("a.example.com.");
        assert!(zone < sub);
        assert!(name("com.") < zone);
    }

    #[test]
    fn covered_by_handles_wrap() {
        let (a, c, e) = (name("a.test."), name("c.test."), name("e.test."));
        let apex = name("test.");
        assert!(c.covered_by(&a, &e));
        assert!(!c.covered_by_exclusive(&c, &e));
        // last record wraps to the apex
        assert!(name("x.test.").covered_by(&e, &apex));
        assert!(apex.covered_by(&e, &apex));
    }

    #[test]
    fn next_label_add_prepends_minimum() {
        let n = name("example.com.");
        let binary = n.next_label_add(Alphabet::Binary).unwrap();
        assert_eq!(binary.labels()[0].as_bytes(), b"\x00");
        let ldh = n.next_label_add(Alphabet::Ldh).unwrap();
        assert_eq!(ldh.labels()[0].as_bytes(), b"0");
        assert!(n < binary && binary < ldh);
    }

    #[test]
    fn next_extend_increase_extends_when_room() {
        let n = name("a.example.com.").next_extend_increase(Alphabet::Ldh).unwrap();
        assert_eq!(n.labels()[0].as_bytes(), b"a0");
    }

    #[test]
    fn ldh_increment_ladder() {
        // a trailing non-max character extends
        let l = Label::new(b"zzy".to_vec()).unwrap();
        assert!(!l.has_max_value(Alphabet::Ldh));
        assert_eq!(
            l.forward_next(Alphabet::Ldh, false).unwrap().as_bytes(),
            b"zzz"
        );
        // all-z at max length increases the middle via carry
        let l = Label::new(vec![b'z'; MAX_LABEL]).unwrap();
        assert!(l.has_max_value(Alphabet::Ldh));
        assert_eq!(
            l.forward_next(Alphabet::Ldh, false),
            Err(NameError::MaxLabelValue)
        );
        // carry: last char exhausted resets and bumps the one before it
        let mut bytes = vec![b'a'; 4];
        bytes[3] = b'z';
        let l = Label::new(bytes).unwrap();
        assert_eq!(
            l.forward_next(Alphabet::Ldh, false).unwrap().as_bytes(),
            b"aab0"
        );
    }

    #[test]
    fn binary_increment_carries() {
        let l = Label::new(vec![0x00, 0xff]).unwrap();
        assert_eq!(
            l.forward_next(Alphabet::Binary, false).unwrap().as_bytes(),
            &[0x01, 0x00]
        );
        let l = Label::new(vec![0xff, 0xff]).unwrap();
        assert_eq!(
            l.forward_next(Alphabet::Binary, false),
            Err(NameError::MaxLabelValue)
        );
    }

    #[test]
    fn name_at_max_length_cannot_grow() {
        // four labels of 62 bytes plus root: wire length 4*63 + 1 = 253;
        // one more 1-byte label would make 255, the limit
        let label = Label::new(vec![b'a'; 62]).unwrap();
        let name = Name::new(vec![
            label.clone(),
            label.clone(),
            label.clone(),
            label,
            Label::root(),
        ])
        .unwrap();
        assert!(name.next_label_add(Alphabet::Binary).is_ok());
        let longer = name.next_label_add(Alphabet::Binary).unwrap();
        assert_eq!(longer.wire_length(), 255);
        assert!(longer.next_label_add(Alphabet::Binary).is_err());
        // no room left to extend, so the leftmost label is increased instead
        let increased = longer.next_extend_increase(Alphabet::Binary).unwrap();
        assert_eq!(increased.labels()[0].as_bytes(), &[0x01]);
    }

    #[test]
    fn split_separates_hash_label_from_zone() {
        let n = name("0123456789abcdef.example.com.");
        let (hash, zone) = n.split(1).unwrap();
        assert_eq!(hash.to_string(), "0123456789abcdef");
        assert_eq!(zone, name("example.com."));
        assert!(n.split(0).is_err());
        assert!(n.split(4).is_err());
    }

    #[test]
    fn hex_label_generator_counts_up() {
        let mut gen = LabelGenerator::hex(0xfe);
        assert_eq!(gen.next().unwrap().0.as_bytes(), b"fe");
        assert_eq!(gen.next().unwrap().0.as_bytes(), b"ff");
        assert_eq!(gen.next().unwrap(), (Label::from_hex_counter(0x100), 0x100));
    }
}
