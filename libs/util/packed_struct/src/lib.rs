// This file is part of RetroGfx.
//
// RetroGfx is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// RetroGfx is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with RetroGfx.  If not, see <http://www.gnu.org/licenses/>.

// Declarative wire structs. All on-disk integers in this corpus are
// little-endian, so the generated accessors decode with from_le and the
// generated constructor encodes with to_le; the struct itself can be
// overlaid on (or written out as) raw bytes via zerocopy.

#[macro_export]
macro_rules! _make_packed_struct_accessor {
    ($field:ident, $field_name:ident, $field_ty:ty, $output_ty:ty) => {
        #[allow(dead_code)]
        pub fn $field_name(&self) -> $output_ty {
            <$field_ty>::from_le(self.$field) as $output_ty
        }
    };

    ($field:ident, $field_name:ident, $field_ty:ty, ) => {
        #[allow(dead_code)]
        pub fn $field_name(&self) -> $field_ty {
            <$field_ty>::from_le(self.$field)
        }
    };
}

#[macro_export]
macro_rules! packed_struct {
    ($name:ident {
        $( $field:ident => $field_name:ident : $field_ty:ty $(as $field_name_ty:ty)? ),+ $(,)?
    }) => {
        #[repr(C, packed)]
        #[derive(::zerocopy::FromBytes, ::zerocopy::AsBytes, ::zerocopy::Unaligned)]
        struct $name {
            $(
                $field: $field_ty
            ),+
        }

        #[allow(dead_code)]
        impl $name {
            pub const SIZE: usize = ::std::mem::size_of::<$name>();

            $(
                $crate::_make_packed_struct_accessor!($field, $field_name, $field_ty, $($field_name_ty)?);
            )+

            pub fn build($($field_name: $field_ty),+) -> Self {
                Self {
                    $( $field: $field_name.to_le() ),+
                }
            }

            pub fn overlay(buf: &[u8]) -> ::anyhow::Result<&$name> {
                let lv = ::zerocopy::LayoutVerified::<&[u8], $name>::new_unaligned(buf)
                    .ok_or_else(|| ::anyhow::anyhow!(
                        "buffer is {} bytes; cannot overlay {} ({} bytes)",
                        buf.len(), stringify!($name), Self::SIZE))?;
                Ok(lv.into_ref())
            }

            pub fn overlay_prefix(buf: &[u8]) -> ::anyhow::Result<&$name> {
                let (lv, _) =
                    ::zerocopy::LayoutVerified::<&[u8], $name>::new_unaligned_from_prefix(buf)
                        .ok_or_else(|| ::anyhow::anyhow!(
                            "buffer is {} bytes; too short to overlay {} ({} bytes)",
                            buf.len(), stringify!($name), Self::SIZE))?;
                Ok(lv.into_ref())
            }

            pub fn overlay_slice(buf: &[u8]) -> ::anyhow::Result<&[$name]> {
                let lv = ::zerocopy::LayoutVerified::<&[u8], [$name]>::new_slice_unaligned(buf)
                    .ok_or_else(|| ::anyhow::anyhow!(
                        "buffer is {} bytes; not a whole number of {} ({} bytes each)",
                        buf.len(), stringify!($name), Self::SIZE))?;
                Ok(lv.into_slice())
            }

            pub fn as_bytes(&self) -> &[u8] {
                <Self as ::zerocopy::AsBytes>::as_bytes(self)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.debug_struct(stringify!($name))
                    $(.field(stringify!($field_name), &self.$field_name()))*
                    .finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    packed_struct!(TestStruct {
        _0 => foo: u8 as usize,
        _1 => bar: u32,
        _2 => baz: u16 as u8
    });

    #[test]
    fn it_has_accessors() {
        let buf: &[u8] = &[42, 1, 0, 0, 0, 0, 1];
        let ts = TestStruct::overlay(buf).unwrap();
        assert_eq!(ts.foo(), 42usize);
        assert_eq!(ts.bar(), 1u32);
        assert_eq!(ts.baz(), 0u8);
    }

    #[test]
    fn it_reads_little_endian() {
        let buf: &[u8] = &[0, 0x34, 0x12, 0, 0, 0xCD, 0xAB];
        let ts = TestStruct::overlay(buf).unwrap();
        assert_eq!(ts.bar(), 0x1234);
        let raw = TestStruct::overlay(buf).unwrap();
        assert_eq!(u16::from_le(raw.baz), 0xABCD);
    }

    #[test]
    fn it_round_trips_through_build() {
        let ts = TestStruct::build(7, 0x01020304, 0x0A0B);
        assert_eq!(ts.as_bytes(), &[7, 4, 3, 2, 1, 0x0B, 0x0A]);
        let back = TestStruct::overlay(ts.as_bytes()).unwrap();
        assert_eq!(back.bar(), 0x01020304);
    }

    #[test]
    fn it_rejects_short_buffers() {
        assert!(TestStruct::overlay(&[0; 3]).is_err());
        assert!(TestStruct::overlay_prefix(&[0; 3]).is_err());
        assert!(TestStruct::overlay_prefix(&[0; 12]).is_ok());
    }

    #[test]
    fn it_can_debug() {
        let buf: &[u8] = &[42, 1, 0, 0, 0, 0, 1];
        let ts = TestStruct::overlay(buf).unwrap();
        let _ = format!("{ts:?}");
    }
}
