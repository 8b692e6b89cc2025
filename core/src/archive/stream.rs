use super::{DecodeError, DecodeErrorKind};

pub(super) const TAG_INT16: u8 = 0x81;
pub(super) const TAG_INT32: u8 = 0x82;
pub(super) const TAG_FLOAT: u8 = 0x83;
pub(super) const TAG_NEW: u8 = 0x84;
pub(super) const TAG_NIL: u8 = 0x85;
pub(super) const TAG_END: u8 = 0x86;

/// Labels are stored biased by this amount so the first table entry is 0x92.
pub(super) const LABEL_BIAS: i64 = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Token {
    New,
    Nil,
    End,
    Label(usize),
}

pub(super) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Reader {
            data,
            pos: 0,
            order: ByteOrder::Little,
        }
    }

    pub(super) fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub(super) fn position(&self) -> usize {
        self.pos
    }

    pub(super) fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(super) fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    pub(super) fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError {
            offset: self.pos.min(self.data.len()),
            kind,
        }
    }

    pub(super) fn peek(&self) -> Result<u8, DecodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))
    }

    pub(super) fn byte(&mut self) -> Result<u8, DecodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    pub(super) fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| self.error(DecodeErrorKind::UnexpectedEnd))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn wide_i16(&mut self) -> Result<i64, DecodeError> {
        let raw = self.fixed::<2>()?;
        Ok(match self.order {
            ByteOrder::Little => i16::from_le_bytes(raw),
            ByteOrder::Big => i16::from_be_bytes(raw),
        } as i64)
    }

    fn wide_i32(&mut self) -> Result<i64, DecodeError> {
        let raw = self.fixed::<4>()?;
        Ok(match self.order {
            ByteOrder::Little => i32::from_le_bytes(raw),
            ByteOrder::Big => i32::from_be_bytes(raw),
        } as i64)
    }

    /// Reads a variable-width integer: a signed byte literal, or a 16/32-bit
    /// value introduced by its tag byte.
    pub(super) fn int(&mut self) -> Result<i64, DecodeError> {
        let start = self.pos;
        let b = self.byte()?;
        match b {
            TAG_INT16 => self.wide_i16(),
            TAG_INT32 => self.wide_i32(),
            0x80..=0x91 => {
                self.pos = start;
                Err(self.error(DecodeErrorKind::UnexpectedTag(b)))
            }
            _ => Ok(b as i8 as i64),
        }
    }

    pub(super) fn length(&mut self) -> Result<usize, DecodeError> {
        let start = self.pos;
        let value = self.int()?;
        usize::try_from(value).map_err(|_| DecodeError {
            offset: start,
            kind: DecodeErrorKind::InvalidLength(value),
        })
    }

    pub(super) fn float(&mut self, width: usize) -> Result<f64, DecodeError> {
        if self.peek()? != TAG_FLOAT {
            return Ok(self.int()? as f64);
        }
        self.pos += 1;
        let value = match (width, self.order) {
            (4, ByteOrder::Little) => f32::from_le_bytes(self.fixed::<4>()?) as f64,
            (4, ByteOrder::Big) => f32::from_be_bytes(self.fixed::<4>()?) as f64,
            (_, ByteOrder::Little) => f64::from_le_bytes(self.fixed::<8>()?),
            (_, ByteOrder::Big) => f64::from_be_bytes(self.fixed::<8>()?),
        };
        Ok(value)
    }

    /// Reads the marker that precedes a shared string, class or object.
    pub(super) fn token(&mut self) -> Result<Token, DecodeError> {
        let start = self.pos;
        match self.peek()? {
            TAG_NEW => {
                self.pos += 1;
                Ok(Token::New)
            }
            TAG_NIL => {
                self.pos += 1;
                Ok(Token::Nil)
            }
            TAG_END => {
                self.pos += 1;
                Ok(Token::End)
            }
            _ => {
                let raw = self.int()?;
                let label = raw + LABEL_BIAS;
                usize::try_from(label).map(Token::Label).map_err(|_| DecodeError {
                    offset: start,
                    kind: DecodeErrorKind::BadReference(raw),
                })
            }
        }
    }
}
