use crate::stream::{InputStream, OutputStream};
use crate::Result;

pub trait Encode {
    fn encode(&self, os: &mut OutputStream) -> Result<()>;
}

pub trait Decode: Sized {
    /// Smallest number of bytes one element can occupy on the wire. Used to
    /// bound sequence sizes against the bytes actually remaining.
    const MIN_WIRE_SIZE: usize;

    fn decode(is: &mut InputStream) -> Result<Self>;
}

macro_rules! primitive_codec {
    ($ty:ty, $size:expr, $write:ident, $read:ident) => {
        impl Encode for $ty {
            fn encode(&self, os: &mut OutputStream) -> Result<()> {
                os.$write(*self);
                Ok(())
            }
        }

        impl Decode for $ty {
            const MIN_WIRE_SIZE: usize = $size;

            fn decode(is: &mut InputStream) -> Result<Self> {
                is.$read()
            }
        }
    };
}

primitive_codec!(bool, 1, write_bool, read_bool);
primitive_codec!(u8, 1, write_byte, read_byte);
primitive_codec!(i16, 2, write_short, read_short);
primitive_codec!(i32, 4, write_int, read_int);
primitive_codec!(i64, 8, write_long, read_long);
primitive_codec!(f32, 4, write_float, read_float);
primitive_codec!(f64, 8, write_double, read_double);

impl Encode for String {
    fn encode(&self, os: &mut OutputStream) -> Result<()> {
        os.write_string(self)
    }
}

impl Encode for &str {
    fn encode(&self, os: &mut OutputStream) -> Result<()> {
        os.write_string(self)
    }
}

impl Decode for String {
    const MIN_WIRE_SIZE: usize = 1;

    fn decode(is: &mut InputStream) -> Result<Self> {
        is.read_string()
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, os: &mut OutputStream) -> Result<()> {
        os.write_seq(self)
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, os: &mut OutputStream) -> Result<()> {
        os.write_seq(self.as_slice())
    }
}

impl<T: Decode> Decode for Vec<T> {
    // an empty nested sequence is a single size byte
    const MIN_WIRE_SIZE: usize = 1;

    fn decode(is: &mut InputStream) -> Result<Self> {
        is.read_seq()
    }
}

impl OutputStream {
    pub fn write_seq<T: Encode>(&mut self, v: &[T]) -> Result<()> {
        self.write_size(v.len())?;
        for e in v {
            e.encode(self)?;
        }
        Ok(())
    }

    /// A `None` sequence is written exactly like an empty one. Readers get an
    /// empty `Vec` back; the distinction is not representable on the wire.
    pub fn write_opt_seq<T: Encode>(&mut self, v: Option<&[T]>) -> Result<()> {
        self.write_seq(v.unwrap_or(&[]))
    }

    pub fn write_short_seq(&mut self, v: &[i16]) -> Result<()> {
        self.write_seq(v)
    }

    pub fn write_int_seq(&mut self, v: &[i32]) -> Result<()> {
        self.write_seq(v)
    }

    pub fn write_string_seq<S: AsRef<str>>(&mut self, v: &[S]) -> Result<()> {
        self.write_size(v.len())?;
        for s in v {
            self.write_string(s.as_ref())?;
        }
        Ok(())
    }
}

impl InputStream {
    pub fn read_seq<T: Decode>(&mut self) -> Result<Vec<T>> {
        let n = self.read_and_check_seq_size(T::MIN_WIRE_SIZE)?;
        let mut rs = Vec::with_capacity(n);
        for _ in 0..n {
            rs.push(T::decode(self)?);
        }
        Ok(rs)
    }

    pub fn read_short_seq(&mut self) -> Result<Vec<i16>> {
        self.read_seq()
    }

    pub fn read_int_seq(&mut self) -> Result<Vec<i32>> {
        self.read_seq()
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>> {
        self.read_seq()
    }
}
