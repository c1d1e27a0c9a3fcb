//! Extended attributes on open files.

use std::fs::File;
use std::io;

use rustix::fs::{XattrFlags, fgetxattr, fsetxattr};
use rustix::io::Errno;

const MAX_VALUE_LEN: usize = 64 * 1024;

fn check_name(name: &str) -> io::Result<()> {
    if name.contains('\0') {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    Ok(())
}

/// Create attribute `name`; fails with `EEXIST` when it is already set.
pub(crate) fn set_create(file: &File, name: &str, value: &[u8]) -> io::Result<()> {
    check_name(name)?;
    fsetxattr(file, name, value, XattrFlags::CREATE).map_err(io::Error::from)
}

/// Read attribute `name`, `None` when it is not set.
pub(crate) fn get(file: &File, name: &str) -> io::Result<Option<Vec<u8>>> {
    check_name(name)?;
    let mut buf = vec![0_u8; MAX_VALUE_LEN];
    match fgetxattr(file, name, &mut buf[..]) {
        Ok(len) => {
            buf.truncate(len);
            Ok(Some(buf))
        }
        Err(Errno::NODATA) => Ok(None),
        Err(errno) => Err(io::Error::from(errno)),
    }
}
