//! Job selection grammar: `all`, a single index (`2`), a comma list
//! (`1,3`) or an inclusive range (`2-4`). Indexes are 1-based positions in
//! the registry listing.

/// Resolve `input` against the registered job names.
pub fn parse_selection(input: &str, names: &[String]) -> Result<Vec<String>, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("Empty selection".to_string());
    }
    if input.eq_ignore_ascii_case("all") {
        return Ok(names.to_vec());
    }

    let pick = |part: &str| -> Result<String, String> {
        part.trim()
            .parse::<usize>()
            .ok()
            .filter(|index| (1..=names.len()).contains(index))
            .map(|index| names[index - 1].clone())
            .ok_or_else(|| format!("Invalid backup number: {}", part.trim()))
    };

    if input.contains(',') {
        return input.split(',').map(pick).collect();
    }

    if let Some((start, end)) = input.split_once('-') {
        let bounds = start
            .trim()
            .parse::<usize>()
            .ok()
            .zip(end.trim().parse::<usize>().ok());
        return match bounds {
            Some((start, end)) if start >= 1 && start <= end && end <= names.len() => {
                Ok(names[start - 1..end].to_vec())
            }
            _ => Err(format!("Invalid range: {}", input)),
        };
    }

    pick(input).map(|name| vec![name])
}
