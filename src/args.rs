/// Input and output settings of a command line sort
#[derive(Debug, Clone, Default)]
pub struct SortArgs {
    pub files: Vec<String>,
    pub output: Option<String>,
    /// Field list like "id:long,name:string"
    pub schema: String,
    pub field_separator: Option<char>,
    /// First line of every input is a header; one header line is written
    pub header: bool,
}

impl SortArgs {
    pub const DEFAULT_SEPARATOR: char = ',';

    pub fn separator(&self) -> char {
        self.field_separator.unwrap_or(Self::DEFAULT_SEPARATOR)
    }

    /// Input names to open; "-" is standard input
    pub fn inputs(&self) -> Vec<&str> {
        if self.files.is_empty() {
            vec!["-"]
        } else {
            self.files.iter().map(String::as_str).collect()
        }
    }
}
