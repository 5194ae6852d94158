//! DNS message codec.
//!
//! This module provides the header, question, answer and message types and
//! their conversions to and from the wire. All integers are big-endian.

use crate::errors::{DecodeError, EncodeError};
use crate::utils::{decode_name, read_u16, read_u32, take, write_name};

/// Size of the fixed DNS header in bytes.
pub const HEADER_LEN: usize = 12;

/// Opcode of a standard query.
pub const OPCODE_QUERY: u8 = 0;

/// Response code for success.
pub const RCODE_NO_ERROR: u8 = 0;

/// Response code for an unsupported opcode.
pub const RCODE_NOT_IMPLEMENTED: u8 = 4;

/// Record type A.
pub const TYPE_A: u16 = 1;

/// Record class IN.
pub const CLASS_IN: u16 = 1;

/// The fixed 12 byte message header.
///
/// Single-bit flags are kept as `bool`; `opcode`, `z` and `rcode` hold only
/// their low 4, 3 and 4 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub num_questions: u16,
    pub num_answers: u16,
    pub num_authorities: u16,
    pub num_additionals: u16,
}

impl Header {
    /// Decode the header at the start of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::HeaderTooShort { len: buf.len() });
        }

        let flags = read_u16(buf, 2)?;
        Ok(Self {
            id: read_u16(buf, 0)?,
            qr: (flags >> 15) & 0x1 == 1,
            opcode: ((flags >> 11) & 0xF) as u8,
            aa: (flags >> 10) & 0x1 == 1,
            tc: (flags >> 9) & 0x1 == 1,
            rd: (flags >> 8) & 0x1 == 1,
            ra: (flags >> 7) & 0x1 == 1,
            z: ((flags >> 4) & 0x7) as u8,
            rcode: (flags & 0xF) as u8,
            num_questions: read_u16(buf, 4)?,
            num_answers: read_u16(buf, 6)?,
            num_authorities: read_u16(buf, 8)?,
            num_additionals: read_u16(buf, 10)?,
        })
    }

    /// Encode the header; out-of-range sub-fields are masked to their width.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let flags = (u16::from(self.qr) << 15)
            | (u16::from(self.opcode & 0xF) << 11)
            | (u16::from(self.aa) << 10)
            | (u16::from(self.tc) << 9)
            | (u16::from(self.rd) << 8)
            | (u16::from(self.ra) << 7)
            | (u16::from(self.z & 0x7) << 4)
            | u16::from(self.rcode & 0xF);

        let mut out = [0u8; HEADER_LEN];
        for (i, word) in [
            self.id,
            flags,
            self.num_questions,
            self.num_answers,
            self.num_authorities,
            self.num_additionals,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Build the header of a reply to `request`.
    ///
    /// Echoes `id`, `opcode` and `rd`, answers non-standard opcodes with
    /// NOTIMP and leaves all counts at zero for the caller to fill in.
    pub fn response_to(request: &Header, recursion_available: bool) -> Self {
        Self {
            id: request.id,
            qr: true,
            opcode: request.opcode,
            aa: false,
            tc: false,
            rd: request.rd,
            ra: recursion_available,
            z: 0,
            rcode: if request.opcode == OPCODE_QUERY {
                RCODE_NO_ERROR
            } else {
                RCODE_NOT_IMPLEMENTED
            },
            ..Self::default()
        }
    }

    /// Header of a fresh single-question recursive query.
    pub fn query(id: u16) -> Self {
        Self {
            id,
            rd: true,
            num_questions: 1,
            ..Self::default()
        }
    }
}

/// An entry of the question section.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub type_: u16,
    pub class_: u16,
}

impl Question {
    pub fn new(name: impl Into<String>, type_: u16, class_: u16) -> Self {
        Self {
            name: name.into(),
            type_,
            class_,
        }
    }

    /// Decode a question at `offset`, returning it and the next offset.
    pub fn from_bytes(buf: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let (name, offset) = decode_name(buf, offset)?;
        let type_ = read_u16(buf, offset)?;
        let class_ = read_u16(buf, offset + 2)?;
        Ok((Self { name, type_, class_ }, offset + 4))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        write_name(out, &self.name)?;
        out.extend_from_slice(&self.type_.to_be_bytes());
        out.extend_from_slice(&self.class_.to_be_bytes());
        Ok(())
    }
}

/// A resource record of the answer section with opaque RDATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub name: String,
    pub type_: u16,
    pub class_: u16,
    pub ttl: u32,
    pub data: Vec<u8>,
}

impl Answer {
    /// Decode a record at `offset`, returning it and the next offset.
    pub fn from_bytes(buf: &[u8], offset: usize) -> Result<(Self, usize), DecodeError> {
        let (name, offset) = decode_name(buf, offset)?;
        let type_ = read_u16(buf, offset)?;
        let class_ = read_u16(buf, offset + 2)?;
        let ttl = read_u32(buf, offset + 4)?;
        let rdlength = usize::from(read_u16(buf, offset + 8)?);
        let data = take(buf, offset + 10, rdlength)?.to_vec();

        let answer = Self {
            name,
            type_,
            class_,
            ttl,
            data,
        };
        Ok((answer, offset + 10 + rdlength))
    }

    /// Encode the record with an uncompressed name; RDLENGTH is `data.len()`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    fn write(&self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        let rdlength = u16::try_from(self.data.len())
            .map_err(|_| EncodeError::DataTooLong { len: self.data.len() })?;
        write_name(out, &self.name)?;
        out.extend_from_slice(&self.type_.to_be_bytes());
        out.extend_from_slice(&self.class_.to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        out.extend_from_slice(&rdlength.to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }

    /// Copy of this record under another owner name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }
}

/// A full message: header, questions and answers.
///
/// Authority and additional records are not carried. Their counts are read
/// from the header on decode but the records themselves are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Answer>,
}

impl Message {
    /// Build a message whose header counts match its sections.
    ///
    /// Sections longer than `u16::MAX` saturate the count, which `to_bytes`
    /// then rejects as a count mismatch.
    pub fn new(mut header: Header, questions: Vec<Question>, answers: Vec<Answer>) -> Self {
        header.num_questions = u16::try_from(questions.len()).unwrap_or(u16::MAX);
        header.num_answers = u16::try_from(answers.len()).unwrap_or(u16::MAX);
        header.num_authorities = 0;
        header.num_additionals = 0;
        Self {
            header,
            questions,
            answers,
        }
    }

    /// Decode a message, reading exactly as many questions and answers as
    /// the header declares.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, DecodeError> {
        let header = Header::from_bytes(buf)?;
        let mut offset = HEADER_LEN;

        let mut questions = Vec::with_capacity(usize::from(header.num_questions).min(32));
        for _ in 0..header.num_questions {
            let (question, next) = Question::from_bytes(buf, offset)?;
            questions.push(question);
            offset = next;
        }

        let mut answers = Vec::with_capacity(usize::from(header.num_answers).min(32));
        for _ in 0..header.num_answers {
            let (answer, next) = Answer::from_bytes(buf, offset)?;
            answers.push(answer);
            offset = next;
        }

        Ok(Self {
            header,
            questions,
            answers,
        })
    }

    /// Encode header, questions and answers in order.
    ///
    /// Fails if the header counts disagree with the sections, including any
    /// non-zero authority or additional count.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        check_count("questions", self.header.num_questions, self.questions.len())?;
        check_count("answers", self.header.num_answers, self.answers.len())?;
        check_count("authorities", self.header.num_authorities, 0)?;
        check_count("additionals", self.header.num_additionals, 0)?;

        let mut out = Vec::with_capacity(512);
        out.extend_from_slice(&self.header.to_bytes());
        for question in &self.questions {
            question.write(&mut out)?;
        }
        for answer in &self.answers {
            answer.write(&mut out)?;
        }
        Ok(out)
    }
}

fn check_count(section: &'static str, declared: u16, actual: usize) -> Result<(), EncodeError> {
    if usize::from(declared) == actual {
        Ok(())
    } else {
        Err(EncodeError::CountMismatch {
            section,
            declared,
            actual,
        })
    }
}
