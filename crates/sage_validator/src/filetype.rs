//! File type detection by content.

use crate::error::{FileProcessingError, Result};
use sage_schema::FileType;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: &[&[u8]] = &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"];
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Detect the container type from magic bytes.
///
/// A ZIP holding `xl/workbook.xml` is an Excel workbook; an OLE2 compound
/// document is a legacy `.xls`; anything else is treated as delimited text.
pub fn detect_file_type(path: &Path) -> Result<FileType> {
    let mut file = File::open(path).map_err(|e| FileProcessingError::io(path, e))?;
    let mut magic = [0u8; 8];
    let mut filled = 0;
    while filled < magic.len() {
        let n = file
            .read(&mut magic[filled..])
            .map_err(|e| FileProcessingError::io(path, e))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let magic = &magic[..filled];

    if ZIP_MAGIC.iter().any(|m| magic.starts_with(m)) {
        return Ok(if is_workbook_archive(path) {
            FileType::Excel
        } else {
            FileType::Zip
        });
    }
    if magic.starts_with(OLE2_MAGIC) {
        return Ok(FileType::Excel);
    }
    Ok(FileType::Csv)
}

fn is_workbook_archive(path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    match zip::ZipArchive::new(file) {
        Ok(archive) => archive.file_names().any(|n| n == "xl/workbook.xml"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, body) in members {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_text_is_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert_eq!(detect_file_type(&path).unwrap(), FileType::Csv);
    }

    #[test]
    fn test_zip_and_xlsx_are_told_apart() {
        let dir = TempDir::new().unwrap();
        let plain = dir.path().join("bundle.zip");
        write_zip(&plain, &[("ventas.csv", "id\n1\n")]);
        assert_eq!(detect_file_type(&plain).unwrap(), FileType::Zip);

        let book = dir.path().join("book.xlsx");
        write_zip(&book, &[("xl/workbook.xml", "<workbook/>")]);
        assert_eq!(detect_file_type(&book).unwrap(), FileType::Excel);
    }

    #[test]
    fn test_ole2_is_excel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("old.xls");
        let mut bytes = OLE2_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 32]);
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(detect_file_type(&path).unwrap(), FileType::Excel);
    }

    #[test]
    fn test_missing_file() {
        let err = detect_file_type(Path::new("/nonexistent/sage/file.csv")).unwrap_err();
        assert!(matches!(err, FileProcessingError::NotFound(_)));
    }
}
