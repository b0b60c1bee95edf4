use crate::backend::ResolutionRequest;

/// System prompt sent alongside every instruction by backends that
/// support one.
pub const SYSTEM_PROMPT: &str = "You are an expert software engineer who resolves version-control merge conflicts. \
You always reply with a single JSON object and nothing else.";

/// Build the natural-language instruction for one conflict. Shared by
/// every backend; only transmission and reply unwrapping differ.
pub fn build_instruction(request: &ResolutionRequest) -> String {
    let fence = request.language.as_deref().unwrap_or("");
    let mut prompt = String::new();

    prompt.push_str("Resolve the following merge conflict.\n\n");
    prompt.push_str(&format!("File: {}\n", request.file_path));
    if let Some(language) = &request.language {
        prompt.push_str(&format!("Language: {}\n", language));
    }

    prompt.push_str(&format!(
        "\nCurrent changes (ours):\n```{}\n{}\n```\n",
        fence, request.current_content
    ));
    prompt.push_str(&format!(
        "\nIncoming changes (theirs):\n```{}\n{}\n```\n",
        fence, request.incoming_content
    ));
    if let Some(base) = &request.base_content {
        prompt.push_str(&format!(
            "\nCommon ancestor (base):\n```{}\n{}\n```\n",
            fence, base
        ));
    }

    prompt.push_str(&format!(
        "\nSurrounding code:\n```{}\n{}\n```\n",
        fence, request.context
    ));

    prompt.push_str(
        "\nRespond with a JSON object with exactly these keys:\n\
         {\n  \"resolution\": \"<the merged code that replaces the whole conflict block, without conflict markers>\",\n  \
         \"explanation\": \"<one or two sentences on how the sides were combined>\",\n  \
         \"confidence\": <number between 0 and 1>\n}\n",
    );

    prompt.push_str(
        "\nGuidelines:\n\
         - Preserve the intent of both the current and the incoming changes.\n\
         - Preserve the functional behavior of the code.\n\
         - Follow the existing code style, naming and indentation.\n\
         - Do not include conflict markers or commentary inside \"resolution\".\n",
    );

    prompt
}
