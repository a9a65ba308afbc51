pub fn read_uleb(bytes: &[u8]) -> nom::IResult<&[u8], u64> {
    let mut result: u64 = 0;
    let mut shift: u32 = 0;
    let mut cursor = bytes;
    while let Ok((next, byte)) =
        nom::number::complete::le_u8::<&[u8], nom::error::Error<&[u8]>>(cursor)
    {
        cursor = next;
        if shift < 64 {
            result |= ((byte & 0x7f) as u64) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok((cursor, result))
}

pub fn read_sleb(bytes: &[u8]) -> nom::IResult<&[u8], i64> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    let mut cursor = bytes;
    while let Ok((next, byte)) =
        nom::number::complete::le_u8::<&[u8], nom::error::Error<&[u8]>>(cursor)
    {
        cursor = next;
        if shift < 64 {
            result |= ((byte & 0x7f) as i64) << shift;
        }
        shift += 7;
        if byte & 0x80 == 0 {
            if byte & 0x40 != 0 && shift < 64 {
                // two's complement
                result -= 1i64 << shift;
            }
            break;
        }
    }
    Ok((cursor, result))
}

pub fn string_upto_null_terminator(bytes: &[u8]) -> nom::IResult<&[u8], String> {
    let (bytes, name_bytes) = match nom::bytes::complete::take_until::<
        &str,
        &[u8],
        nom::error::Error<&[u8]>,
    >("\0")(bytes)
    {
        Ok((bytes, name_bytes)) => (bytes, name_bytes),
        Err(_) => return Ok((&[], String::from_utf8_lossy(bytes).into_owned())),
    };
    let name = String::from_utf8_lossy(name_bytes).into_owned();
    Ok((&bytes[1..], name))
}
